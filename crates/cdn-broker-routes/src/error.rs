//! Error types for the route manager.

/// Result type alias using [`RouteError`].
pub type RouteResult<T> = Result<T, RouteError>;

/// Errors that can occur while managing routes.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No route exists for the given service instance.
    ///
    /// This is the one error the facade surfaces as a domain sentinel;
    /// everything else propagates as-is.
    #[error("service instance does not exist: {0}")]
    InstanceDoesNotExist(String),

    /// A route already exists for the given service instance.
    #[error("service instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// CDN control plane error.
    #[error("CDN error: {0}")]
    Cdn(String),

    /// IAM certificate store error.
    #[error("IAM error: {0}")]
    Iam(String),

    /// ACME certificate authority error.
    #[error("ACME error: {0}")]
    Acme(String),

    /// DNS resolution error.
    ///
    /// The probe treats these as "not ready" rather than propagating them;
    /// the variant exists for resolver construction and backend reporting.
    #[error("DNS error: {0}")]
    Dns(String),

    /// The certificate PEM could not be parsed.
    ///
    /// Fatal for the enclosing transition; the route state does not advance.
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    /// A route that should own a certificate has none.
    #[error("route has no certificate: {0}")]
    CertificateMissing(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouteError {
    /// Create a CDN error.
    #[must_use]
    pub fn cdn(msg: impl Into<String>) -> Self {
        Self::Cdn(msg.into())
    }

    /// Create an IAM error.
    #[must_use]
    pub fn iam(msg: impl Into<String>) -> Self {
        Self::Iam(msg.into())
    }

    /// Create an ACME error.
    #[must_use]
    pub fn acme(msg: impl Into<String>) -> Self {
        Self::Acme(msg.into())
    }

    /// Create a DNS error.
    #[must_use]
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
