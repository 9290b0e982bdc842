//! In-memory mock backends for testing.
//!
//! Each mock records its externally visible calls into a shared
//! [`CallLog`], since the deploy-order guarantees under test span the IAM
//! and CDN backends. The mocks model the asynchronous behaviour of the
//! real services: disabling a distribution starts a propagation window
//! during which deletion is refused, and the ACME mock issues real
//! self-signed PEM chains so expiry parsing is exercised end to end.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cloud::{AcmeBackend, CdnBackend, IamBackend};
use crate::dns::DnsResolver;
use crate::error::{RouteError, RouteResult};
use crate::types::{
    CertificateResource, Distribution, DistributionRequest, DistributionStatus,
};

/// Shared recorder of backend calls, in invocation order.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call.
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// All recorded calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls whose name starts with the given prefix.
    #[must_use]
    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Position of the first call starting with the given prefix.
    #[must_use]
    pub fn position_of(&self, prefix: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c.starts_with(prefix))
    }

    /// Forget all recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// One-shot failure injection shared by the mocks.
#[derive(Debug, Default)]
struct FailureSet {
    ops: Mutex<HashSet<String>>,
}

impl FailureSet {
    fn arm(&self, op: &str) {
        self.ops.lock().insert(op.to_owned());
    }

    /// Consume an armed failure for `op`, returning whether one fired.
    fn fire(&self, op: &str) -> bool {
        self.ops.lock().remove(op)
    }
}

/// Mock CDN control plane.
#[derive(Debug, Default)]
pub struct MockCdn {
    log: Arc<CallLog>,
    distributions: Mutex<HashMap<String, Distribution>>,
    bound_certs: Mutex<HashMap<String, String>>,
    failures: FailureSet,
    next_id: AtomicU64,
}

impl MockCdn {
    /// Create a mock recording into the given log.
    #[must_use]
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Set a distribution's deploy status (simulates edge propagation
    /// completing).
    pub fn set_status(&self, dist_id: &str, status: DistributionStatus) {
        if let Some(dist) = self.distributions.lock().get_mut(dist_id) {
            dist.status = status;
        }
    }

    /// The distribution as currently stored, if it exists.
    #[must_use]
    pub fn distribution(&self, dist_id: &str) -> Option<Distribution> {
        self.distributions.lock().get(dist_id).cloned()
    }

    /// The certificate ID currently bound to the distribution's viewer TLS.
    #[must_use]
    pub fn bound_certificate(&self, dist_id: &str) -> Option<String> {
        self.bound_certs.lock().get(dist_id).cloned()
    }

    /// Make the next invocation of the named operation fail.
    pub fn fail_once(&self, op: &str) {
        self.failures.arm(op);
    }

    fn check_failure(&self, op: &str) -> RouteResult<()> {
        if self.failures.fire(op) {
            return Err(RouteError::cdn(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl CdnBackend for MockCdn {
    async fn create(&self, request: &DistributionRequest) -> RouteResult<Distribution> {
        self.log
            .record(format!("cdn.create {}", request.domains.join(",")));
        self.check_failure("create")?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("dist-{n:06}");
        let dist = Distribution {
            id: id.clone(),
            domain_name: format!("{id}.mock.cdn.example"),
            status: DistributionStatus::InProgress,
            enabled: true,
        };

        self.distributions.lock().insert(id, dist.clone());
        Ok(dist)
    }

    async fn update(
        &self,
        dist_id: &str,
        request: &DistributionRequest,
    ) -> RouteResult<Distribution> {
        self.log
            .record(format!("cdn.update {dist_id} {}", request.domains.join(",")));
        self.check_failure("update")?;

        let mut distributions = self.distributions.lock();
        let dist = distributions
            .get_mut(dist_id)
            .ok_or_else(|| RouteError::cdn(format!("no such distribution: {dist_id}")))?;
        dist.status = DistributionStatus::InProgress;
        Ok(dist.clone())
    }

    async fn get(&self, dist_id: &str) -> RouteResult<Distribution> {
        self.log.record(format!("cdn.get {dist_id}"));
        self.check_failure("get")?;

        self.distributions
            .lock()
            .get(dist_id)
            .cloned()
            .ok_or_else(|| RouteError::cdn(format!("no such distribution: {dist_id}")))
    }

    async fn set_certificate(&self, dist_id: &str, cert_id: &str) -> RouteResult<()> {
        self.log
            .record(format!("cdn.set_certificate {dist_id} {cert_id}"));
        self.check_failure("set_certificate")?;

        if !self.distributions.lock().contains_key(dist_id) {
            return Err(RouteError::cdn(format!("no such distribution: {dist_id}")));
        }
        self.bound_certs
            .lock()
            .insert(dist_id.to_owned(), cert_id.to_owned());
        Ok(())
    }

    async fn disable(&self, dist_id: &str) -> RouteResult<()> {
        self.log.record(format!("cdn.disable {dist_id}"));
        self.check_failure("disable")?;

        let mut distributions = self.distributions.lock();
        let dist = distributions
            .get_mut(dist_id)
            .ok_or_else(|| RouteError::cdn(format!("no such distribution: {dist_id}")))?;
        dist.enabled = false;
        dist.status = DistributionStatus::InProgress;
        Ok(())
    }

    async fn delete(&self, dist_id: &str) -> RouteResult<bool> {
        self.log.record(format!("cdn.delete {dist_id}"));
        self.check_failure("delete")?;

        let mut distributions = self.distributions.lock();
        let dist = distributions
            .get(dist_id)
            .ok_or_else(|| RouteError::cdn(format!("no such distribution: {dist_id}")))?;

        if dist.status != DistributionStatus::Deployed {
            return Ok(false);
        }

        distributions.remove(dist_id);
        self.bound_certs.lock().remove(dist_id);
        Ok(true)
    }
}

/// Mock IAM server-certificate store.
#[derive(Debug, Default)]
pub struct MockIam {
    log: Arc<CallLog>,
    aliases: Mutex<HashMap<String, String>>,
    failures: FailureSet,
    next_id: AtomicU64,
}

impl MockIam {
    /// Create a mock recording into the given log.
    #[must_use]
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Whether a certificate is stored under the given alias.
    #[must_use]
    pub fn contains_alias(&self, alias: &str) -> bool {
        self.aliases.lock().contains_key(alias)
    }

    /// The certificate ID stored under the given alias.
    #[must_use]
    pub fn cert_id(&self, alias: &str) -> Option<String> {
        self.aliases.lock().get(alias).cloned()
    }

    /// Make the next invocation of the named operation fail.
    pub fn fail_once(&self, op: &str) {
        self.failures.arm(op);
    }

    fn check_failure(&self, op: &str) -> RouteResult<()> {
        if self.failures.fire(op) {
            return Err(RouteError::iam(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl IamBackend for MockIam {
    async fn upload_certificate(
        &self,
        alias: &str,
        _resource: &CertificateResource,
    ) -> RouteResult<String> {
        self.log.record(format!("iam.upload_certificate {alias}"));
        self.check_failure("upload_certificate")?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cert_id = format!("iam-cert-{n:06}");
        // Re-uploading a staging alias replaces it, so an interrupted
        // deploy converges on retry.
        self.aliases.lock().insert(alias.to_owned(), cert_id.clone());
        Ok(cert_id)
    }

    async fn rename_certificate(&self, from: &str, to: &str) -> RouteResult<()> {
        self.log
            .record(format!("iam.rename_certificate {from} {to}"));
        self.check_failure("rename_certificate")?;

        let mut aliases = self.aliases.lock();
        if let Some(cert_id) = aliases.remove(from) {
            aliases.insert(to.to_owned(), cert_id);
            Ok(())
        } else if aliases.contains_key(to) {
            // Already renamed by an earlier, interrupted attempt.
            Ok(())
        } else {
            Err(RouteError::iam(format!("no certificate under alias {from}")))
        }
    }

    async fn delete_certificate(&self, alias: &str, force: bool) -> RouteResult<()> {
        self.log
            .record(format!("iam.delete_certificate {alias} force={force}"));
        self.check_failure("delete_certificate")?;

        if self.aliases.lock().remove(alias).is_some() || force {
            Ok(())
        } else {
            Err(RouteError::iam(format!("no certificate under alias {alias}")))
        }
    }
}

/// Mock ACME certificate authority.
///
/// Issues real self-signed PEM chains so that expiry parsing downstream
/// sees genuine certificates.
#[derive(Debug)]
pub struct MockAcme {
    log: Arc<CallLog>,
    expires: Mutex<DateTime<Utc>>,
    failing_domains: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl MockAcme {
    /// Create a mock recording into the given log. Issued certificates
    /// expire 90 days out unless [`MockAcme::set_expires`] overrides it.
    #[must_use]
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            expires: Mutex::new(Utc::now() + chrono::Duration::days(90)),
            failing_domains: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Set the not-after time of subsequently issued certificates.
    pub fn set_expires(&self, expires: DateTime<Utc>) {
        *self.expires.lock() = expires;
    }

    /// Make issuance and renewal fail for any request covering `domain`.
    pub fn fail_for(&self, domain: &str) {
        self.failing_domains.lock().insert(domain.to_owned());
    }

    fn issue(&self, domains: &[String], cert_url: String) -> RouteResult<CertificateResource> {
        {
            let failing = self.failing_domains.lock();
            if domains.iter().any(|d| failing.contains(d)) {
                return Err(RouteError::acme("injected issuance failure"));
            }
        }

        let expires = *self.expires.lock();
        let mut params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| RouteError::acme(e.to_string()))?;
        params.not_after = time::OffsetDateTime::from_unix_timestamp(expires.timestamp())
            .map_err(|e| RouteError::acme(e.to_string()))?;

        let key_pair = rcgen::KeyPair::generate().map_err(|e| RouteError::acme(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| RouteError::acme(e.to_string()))?;

        Ok(CertificateResource {
            domain: domains[0].clone(),
            cert_url,
            certificate: cert.pem().into_bytes(),
        })
    }
}

#[async_trait]
impl AcmeBackend for MockAcme {
    async fn obtain_certificate(&self, domains: &[String]) -> RouteResult<CertificateResource> {
        self.log
            .record(format!("acme.obtain_certificate {}", domains.join(",")));

        if domains.is_empty() {
            return Err(RouteError::acme("no domains requested"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.issue(domains, format!("https://acme.invalid/cert/{n}"))
    }

    async fn renew_certificate(
        &self,
        resource: &CertificateResource,
    ) -> RouteResult<CertificateResource> {
        self.log
            .record(format!("acme.renew_certificate {}", resource.cert_url));

        // Renewal keeps the CA resource URL.
        self.issue(&[resource.domain.clone()], resource.cert_url.clone())
    }
}

/// Fixed-table DNS resolver.
#[derive(Debug, Default)]
pub struct StaticResolver {
    cnames: Mutex<HashMap<String, String>>,
    hosts: Mutex<HashMap<String, Vec<IpAddr>>>,
    failing: Mutex<HashSet<String>>,
}

impl StaticResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CNAME target returned for `host`.
    pub fn set_cname(&self, host: &str, target: &str) {
        self.cnames.lock().insert(host.to_owned(), target.to_owned());
    }

    /// Set the addresses returned for `host`.
    pub fn set_hosts(&self, host: &str, addrs: Vec<IpAddr>) {
        self.hosts.lock().insert(host.to_owned(), addrs);
    }

    /// Make every lookup of `host` fail.
    pub fn fail_for(&self, host: &str) {
        self.failing.lock().insert(host.to_owned());
    }

    fn check_failure(&self, host: &str) -> RouteResult<()> {
        if self.failing.lock().contains(host) {
            return Err(RouteError::dns(format!("injected lookup failure: {host}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn lookup_cname(&self, host: &str) -> RouteResult<Option<String>> {
        self.check_failure(host)?;
        Ok(self.cnames.lock().get(host).cloned())
    }

    async fn lookup_hosts(&self, host: &str) -> RouteResult<Vec<IpAddr>> {
        self.check_failure(host)?;
        Ok(self.hosts.lock().get(host).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::expiration_of;

    fn request(domains: &[&str]) -> DistributionRequest {
        DistributionRequest {
            domains: domains.iter().map(|d| (*d).to_owned()).collect(),
            origin: "origin.app".to_owned(),
            path: "/".to_owned(),
            insecure_origin: false,
            forwarded_headers: vec!["Host".to_owned()],
            tags: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn cdn_delete_waits_for_deployed_status() {
        let log = Arc::new(CallLog::new());
        let cdn = MockCdn::new(Arc::clone(&log));

        let dist = cdn.create(&request(&["a.example.com"])).await.unwrap();
        cdn.set_status(&dist.id, DistributionStatus::Deployed);

        cdn.disable(&dist.id).await.unwrap();
        assert!(!cdn.distribution(&dist.id).unwrap().enabled);

        // Disable knocked the status back to propagating.
        assert!(!cdn.delete(&dist.id).await.unwrap());

        cdn.set_status(&dist.id, DistributionStatus::Deployed);
        assert!(cdn.delete(&dist.id).await.unwrap());
        assert!(cdn.distribution(&dist.id).is_none());
    }

    #[tokio::test]
    async fn cdn_update_knocks_status_back_to_propagating() {
        let log = Arc::new(CallLog::new());
        let cdn = MockCdn::new(Arc::clone(&log));

        let dist = cdn.create(&request(&["a.example.com"])).await.unwrap();
        cdn.set_status(&dist.id, DistributionStatus::Deployed);

        let updated = cdn
            .update(&dist.id, &request(&["a.example.com", "b.example.com"]))
            .await
            .unwrap();
        assert_eq!(updated.status, DistributionStatus::InProgress);

        assert!(cdn.update("dist-999999", &request(&["a.example.com"])).await.is_err());
    }

    #[tokio::test]
    async fn cdn_injected_failure_fires_once() {
        let log = Arc::new(CallLog::new());
        let cdn = MockCdn::new(Arc::clone(&log));

        cdn.fail_once("create");
        assert!(cdn.create(&request(&["a.example.com"])).await.is_err());
        assert!(cdn.create(&request(&["a.example.com"])).await.is_ok());
    }

    #[tokio::test]
    async fn iam_rename_moves_the_alias() {
        let log = Arc::new(CallLog::new());
        let iam = MockIam::new(Arc::clone(&log));

        let resource = CertificateResource {
            domain: "a.example.com".to_owned(),
            cert_url: "https://acme.invalid/cert/1".to_owned(),
            certificate: b"pem".to_vec(),
        };

        let cert_id = iam.upload_certificate("staging", &resource).await.unwrap();
        iam.rename_certificate("staging", "canonical").await.unwrap();

        assert!(!iam.contains_alias("staging"));
        assert_eq!(iam.cert_id("canonical"), Some(cert_id));
    }

    #[tokio::test]
    async fn iam_rename_tolerates_already_renamed() {
        let log = Arc::new(CallLog::new());
        let iam = MockIam::new(Arc::clone(&log));

        let resource = CertificateResource {
            domain: "a.example.com".to_owned(),
            cert_url: "https://acme.invalid/cert/1".to_owned(),
            certificate: b"pem".to_vec(),
        };

        iam.upload_certificate("staging", &resource).await.unwrap();
        iam.rename_certificate("staging", "canonical").await.unwrap();

        // A second rename after the first completed is a no-op.
        iam.rename_certificate("staging", "canonical").await.unwrap();

        // But renaming a name that never existed is still an error.
        assert!(iam.rename_certificate("missing", "elsewhere").await.is_err());
    }

    #[tokio::test]
    async fn iam_delete_respects_force() {
        let log = Arc::new(CallLog::new());
        let iam = MockIam::new(Arc::clone(&log));

        assert!(iam.delete_certificate("missing", false).await.is_err());
        assert!(iam.delete_certificate("missing", true).await.is_ok());
    }

    #[tokio::test]
    async fn acme_issues_parseable_certificates() {
        let log = Arc::new(CallLog::new());
        let acme = MockAcme::new(Arc::clone(&log));

        let expires = Utc::now() + chrono::Duration::days(42);
        acme.set_expires(expires);

        let resource = acme
            .obtain_certificate(&["a.example.com".to_owned(), "b.example.com".to_owned()])
            .await
            .unwrap();

        assert_eq!(resource.domain, "a.example.com");
        let parsed = expiration_of(&resource.certificate).unwrap();
        assert_eq!(parsed.timestamp(), expires.timestamp());
    }

    #[tokio::test]
    async fn acme_renewal_keeps_the_resource_url() {
        let log = Arc::new(CallLog::new());
        let acme = MockAcme::new(Arc::clone(&log));

        let resource = acme
            .obtain_certificate(&["a.example.com".to_owned()])
            .await
            .unwrap();
        let renewed = acme.renew_certificate(&resource).await.unwrap();

        assert_eq!(renewed.cert_url, resource.cert_url);
        assert_ne!(renewed.certificate, resource.certificate);
    }

    #[tokio::test]
    async fn acme_failure_injection_by_domain() {
        let log = Arc::new(CallLog::new());
        let acme = MockAcme::new(Arc::clone(&log));

        acme.fail_for("a.example.com");
        assert!(acme
            .obtain_certificate(&["a.example.com".to_owned()])
            .await
            .is_err());
        assert!(acme
            .obtain_certificate(&["b.example.com".to_owned()])
            .await
            .is_ok());
    }
}
