//! Core types for the route manager.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far ahead of certificate expiry the renewal sweep reaches, in days.
///
/// Policy constant: a provisioned route whose certificate expires strictly
/// before `now + RENEW_BEFORE_DAYS` is due for renewal.
pub const RENEW_BEFORE_DAYS: i64 = 30;

/// The expiry cutoff used by the renewal sweep at a given instant.
///
/// Certificates expiring exactly at the threshold are not yet due; the
/// comparison is strict.
#[must_use]
pub fn renewal_threshold(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::days(RENEW_BEFORE_DAYS)
}

/// Unique identifier for a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(String);

impl RouteId {
    /// Create a route ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique route ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RouteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a certificate row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    /// Create a certificate ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique certificate ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CertificateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Tenant-supplied opaque handle for a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create an instance ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Persisted route state representation for database storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    /// Distribution created, waiting on tenant DNS and deploy propagation.
    Provisioning,
    /// Certificate installed; the route is live.
    Provisioned,
    /// Distribution disabled, waiting for teardown to complete.
    Deprovisioning,
    /// Distribution deleted and certificate removed.
    Deprovisioned,
}

impl RouteState {
    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Deprovisioning => "deprovisioning",
            Self::Deprovisioned => "deprovisioned",
        }
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RouteState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "provisioned" => Ok(Self::Provisioned),
            "deprovisioning" => Ok(Self::Deprovisioning),
            "deprovisioned" => Ok(Self::Deprovisioned),
            _ => Err(format!("unknown route state: {s}")),
        }
    }
}

/// Common data shared across all route states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteData {
    /// Unique route identifier.
    pub id: RouteId,
    /// Service instance this route belongs to.
    pub instance_id: InstanceId,
    /// Comma-joined tenant-facing hostnames (the certificate SAN list).
    pub domain_external: String,
    /// Distribution hostname assigned by the CDN.
    pub domain_internal: Option<String>,
    /// CDN-assigned distribution identifier.
    pub dist_id: Option<String>,
    /// Origin host requests are forwarded to.
    pub origin: String,
    /// Path prefix on the origin.
    pub path: String,
    /// The current certificate for this route, if one has been installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    /// When the route was created.
    pub created_at: DateTime<Utc>,
    /// When the route was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the route finished deprovisioning, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RouteData {
    /// Create new route data for a service instance.
    #[must_use]
    pub fn new(instance_id: &str, domain: &str, origin: &str, path: &str) -> Self {
        let now = Utc::now();
        Self {
            id: RouteId::generate(),
            instance_id: InstanceId::new(instance_id),
            domain_external: domain.to_owned(),
            domain_internal: None,
            dist_id: None,
            origin: origin.to_owned(),
            path: path.to_owned(),
            certificate: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// The tenant-facing hostnames covered by this route.
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        self.domain_external.split(',').map(str::to_owned).collect()
    }

    /// Canonical IAM alias for this route's certificate.
    #[must_use]
    pub fn cert_alias(&self) -> String {
        format!("cdn-route-{}", self.domain_external)
    }

    /// Staging IAM alias a freshly uploaded certificate is held under until
    /// it has been bound to the distribution.
    #[must_use]
    pub fn staging_cert_alias(&self) -> String {
        format!("cdn-route-{}-new", self.domain_external)
    }
}

/// A route record as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    /// The route data.
    #[serde(flatten)]
    pub data: RouteData,
    /// Current state.
    pub state: RouteState,
}

impl RouteRecord {
    /// Create a new route record in the provisioning state.
    #[must_use]
    pub const fn new(data: RouteData) -> Self {
        Self {
            data,
            state: RouteState::Provisioning,
        }
    }
}

/// The current certificate for a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Unique certificate identifier.
    pub id: CertificateId,
    /// Route this certificate belongs to.
    pub route_id: RouteId,
    /// Common name reported by the certificate authority.
    pub domain: String,
    /// CA-assigned resource URL, required for ACME renewal.
    pub cert_url: String,
    /// PEM-encoded certificate chain.
    pub certificate: Vec<u8>,
    /// Not-after time parsed from the chain's leaf.
    pub expires: DateTime<Utc>,
    /// When the certificate row was created.
    pub created_at: DateTime<Utc>,
    /// When the certificate row was last rewritten.
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    /// Create a certificate row from a freshly obtained ACME resource.
    #[must_use]
    pub fn new(route_id: RouteId, resource: CertificateResource, expires: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: CertificateId::generate(),
            route_id,
            domain: resource.domain,
            cert_url: resource.cert_url,
            certificate: resource.certificate,
            expires,
            created_at: now,
            updated_at: now,
        }
    }

    /// The ACME resource this certificate renews from.
    #[must_use]
    pub fn resource(&self) -> CertificateResource {
        CertificateResource {
            domain: self.domain.clone(),
            cert_url: self.cert_url.clone(),
            certificate: self.certificate.clone(),
        }
    }

    /// This row rewritten in place with a renewed resource.
    ///
    /// The identifiers and creation time are preserved so renewal never
    /// produces a second row for the route.
    #[must_use]
    pub fn renewed(&self, resource: CertificateResource, expires: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            route_id: self.route_id.clone(),
            domain: resource.domain,
            cert_url: resource.cert_url,
            certificate: resource.certificate,
            expires,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// A certificate as issued by the ACME certificate authority.
///
/// Domain, resource URL and PEM chain together form the renewal key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResource {
    /// Common name reported by the CA.
    pub domain: String,
    /// CA-assigned resource URL.
    pub cert_url: String,
    /// PEM-encoded certificate chain.
    pub certificate: Vec<u8>,
}

/// Deploy status of an edge distribution as reported by the CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionStatus {
    /// Configuration changes have fully propagated.
    Deployed,
    /// Configuration changes are still propagating to the edge.
    InProgress,
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployed => write!(f, "Deployed"),
            Self::InProgress => write!(f, "InProgress"),
        }
    }
}

/// An edge distribution as observed through the CDN control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    /// CDN-assigned distribution identifier.
    pub id: String,
    /// Hostname the distribution serves from.
    pub domain_name: String,
    /// Deploy status.
    pub status: DistributionStatus,
    /// Whether the distribution configuration is enabled.
    pub enabled: bool,
}

impl Distribution {
    /// Whether the distribution is fully deployed and enabled.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.status, DistributionStatus::Deployed) && self.enabled
    }
}

/// Request to create or update an edge distribution.
#[derive(Debug, Clone)]
pub struct DistributionRequest {
    /// Tenant-facing hostnames (distribution aliases).
    pub domains: Vec<String>,
    /// Origin host.
    pub origin: String,
    /// Path prefix on the origin.
    pub path: String,
    /// Whether the origin only speaks plain HTTP.
    pub insecure_origin: bool,
    /// Request headers forwarded to the origin.
    pub forwarded_headers: Vec<String>,
    /// Tags applied to the distribution.
    pub tags: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_state_roundtrip() {
        for state in [
            RouteState::Provisioning,
            RouteState::Provisioned,
            RouteState::Deprovisioning,
            RouteState::Deprovisioned,
        ] {
            let parsed: RouteState = state.as_str().parse().expect("parse failed");
            assert_eq!(parsed, state);
        }

        assert!("active".parse::<RouteState>().is_err());
    }

    #[test]
    fn domains_splits_san_list() {
        let data = RouteData::new("inst-1", "a.example.com,b.example.com", "origin.app", "/");
        assert_eq!(data.domains(), vec!["a.example.com", "b.example.com"]);

        let single = RouteData::new("inst-2", "a.example.com", "origin.app", "/");
        assert_eq!(single.domains(), vec!["a.example.com"]);
    }

    #[test]
    fn cert_aliases_derive_from_external_domain() {
        let data = RouteData::new("inst-1", "a.example.com,b.example.com", "origin.app", "/");
        assert_eq!(data.cert_alias(), "cdn-route-a.example.com,b.example.com");
        assert_eq!(
            data.staging_cert_alias(),
            "cdn-route-a.example.com,b.example.com-new"
        );
    }

    #[test]
    fn renewal_threshold_is_thirty_days_out() {
        let now = Utc::now();
        assert_eq!(renewal_threshold(now) - now, chrono::Duration::days(30));
    }

    #[test]
    fn renewed_certificate_keeps_identity() {
        let original = Certificate::new(
            RouteId::generate(),
            CertificateResource {
                domain: "a.example.com".to_owned(),
                cert_url: "https://acme.invalid/cert/1".to_owned(),
                certificate: b"old".to_vec(),
            },
            Utc::now() + chrono::Duration::days(10),
        );

        let expires = Utc::now() + chrono::Duration::days(90);
        let renewed = original.renewed(
            CertificateResource {
                domain: "a.example.com".to_owned(),
                cert_url: "https://acme.invalid/cert/1".to_owned(),
                certificate: b"new".to_vec(),
            },
            expires,
        );

        assert_eq!(renewed.id, original.id);
        assert_eq!(renewed.route_id, original.route_id);
        assert_eq!(renewed.created_at, original.created_at);
        assert_eq!(renewed.certificate, b"new");
        assert_eq!(renewed.expires, expires);
    }

    #[test]
    fn distribution_readiness() {
        let mut dist = Distribution {
            id: "dist-1".to_owned(),
            domain_name: "d1.cdn.example".to_owned(),
            status: DistributionStatus::Deployed,
            enabled: true,
        };
        assert!(dist.is_ready());

        dist.enabled = false;
        assert!(!dist.is_ready());

        dist.enabled = true;
        dist.status = DistributionStatus::InProgress;
        assert!(!dist.is_ready());
    }
}
