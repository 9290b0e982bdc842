//! Capability contracts for the external collaborators.
//!
//! The route manager depends on three thread-safe handles, instantiated
//! once and shared: the CDN control plane, the IAM server-certificate
//! store, and an ACME client. Production implementations wrap the
//! respective SDKs; [`crate::mock`] provides in-memory implementations
//! that record call order for tests.

use async_trait::async_trait;

use crate::error::RouteResult;
use crate::types::{CertificateResource, Distribution, DistributionRequest};

/// CDN control plane operations.
#[async_trait]
pub trait CdnBackend: Send + Sync {
    /// Create a new edge distribution.
    ///
    /// Implementations configure two origins: the tenant origin for normal
    /// traffic and the challenge bucket serving
    /// `/.well-known/acme-challenge/*` so the CA can validate the domains
    /// over HTTP-01.
    async fn create(&self, request: &DistributionRequest) -> RouteResult<Distribution>;

    /// Update a distribution's domains and origins, preserving its
    /// original caller reference.
    async fn update(
        &self,
        dist_id: &str,
        request: &DistributionRequest,
    ) -> RouteResult<Distribution>;

    /// Get a distribution's observable status and enabled flag.
    async fn get(&self, dist_id: &str) -> RouteResult<Distribution>;

    /// Bind an IAM certificate to the distribution's viewer TLS.
    ///
    /// Implementations bind with the IAM certificate source, SNI-only
    /// support and TLSv1 as the minimum protocol version.
    async fn set_certificate(&self, dist_id: &str, cert_id: &str) -> RouteResult<()>;

    /// Disable the distribution. Takes effect asynchronously at the edge.
    async fn disable(&self, dist_id: &str) -> RouteResult<()>;

    /// Attempt to delete a disabled distribution.
    ///
    /// Returns `true` only when the distribution status was `Deployed`
    /// again after disabling and the deletion was accepted; `false` means
    /// the disable is still propagating and the caller should retry later.
    /// Never blocks waiting for propagation.
    async fn delete(&self, dist_id: &str) -> RouteResult<bool>;
}

/// IAM server-certificate store operations.
#[async_trait]
pub trait IamBackend: Send + Sync {
    /// Upload a certificate under the given alias, returning the
    /// store-assigned certificate ID.
    async fn upload_certificate(
        &self,
        alias: &str,
        resource: &CertificateResource,
    ) -> RouteResult<String>;

    /// Rename a certificate alias.
    ///
    /// Must tolerate the "already renamed" case: when `from` is gone but
    /// `to` exists, a retry of an interrupted deploy is completing.
    async fn rename_certificate(&self, from: &str, to: &str) -> RouteResult<()>;

    /// Delete the certificate under the given alias.
    async fn delete_certificate(&self, alias: &str, force: bool) -> RouteResult<()>;
}

/// ACME certificate authority operations.
#[async_trait]
pub trait AcmeBackend: Send + Sync {
    /// Obtain a certificate for the given SAN list, completing HTTP-01
    /// challenges through the distribution's challenge origin.
    async fn obtain_certificate(&self, domains: &[String]) -> RouteResult<CertificateResource>;

    /// Renew a certificate from its existing resource (domain, URL and
    /// PEM chain form the renewal key).
    async fn renew_certificate(
        &self,
        resource: &CertificateResource,
    ) -> RouteResult<CertificateResource>;
}
