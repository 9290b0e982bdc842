//! Route manager facade and per-route reconciliation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cert::expiration_of;
use crate::cloud::{AcmeBackend, CdnBackend, IamBackend};
use crate::config::CdnConfig;
use crate::dns::DnsProbe;
use crate::error::{RouteError, RouteResult};
use crate::lock::InstanceLocks;
use crate::state::{AnyRoute, Deprovisioning, Provisioning, Route};
use crate::store::RouteStore;
use crate::types::{
    renewal_threshold, Certificate, CertificateResource, DistributionRequest, InstanceId,
    RouteData, RouteRecord,
};

/// Orchestrates the route lifecycle.
///
/// Invoked both from the broker's request handlers and from the periodic
/// background driver; the two may run in parallel across routes but are
/// serialised per service instance.
pub struct RouteManager {
    store: Arc<dyn RouteStore>,
    cdn: Arc<dyn CdnBackend>,
    iam: Arc<dyn IamBackend>,
    acme: Arc<dyn AcmeBackend>,
    probe: DnsProbe,
    settings: CdnConfig,
    locks: InstanceLocks,
}

impl RouteManager {
    /// Create a new route manager.
    pub fn new(
        store: Arc<dyn RouteStore>,
        cdn: Arc<dyn CdnBackend>,
        iam: Arc<dyn IamBackend>,
        acme: Arc<dyn AcmeBackend>,
        probe: DnsProbe,
        settings: CdnConfig,
    ) -> Self {
        Self {
            store,
            cdn,
            iam,
            acme,
            probe,
            settings,
            locks: InstanceLocks::new(),
        }
    }

    /// Create a route for a new service instance.
    ///
    /// Creates the edge distribution first, then stores the route in the
    /// provisioning state with the CDN-assigned identifiers. A CDN failure
    /// propagates before anything is persisted; a duplicate instance
    /// surfaces as a conflict from the store.
    pub async fn create(
        &self,
        instance_id: &str,
        domain: &str,
        origin: &str,
        path: &str,
    ) -> RouteResult<RouteRecord> {
        let mut data = RouteData::new(instance_id, domain, origin, path);

        info!(
            instance = %data.instance_id,
            domain = %domain,
            origin = %origin,
            "creating route"
        );

        let dist = self.cdn.create(&self.distribution_request(&data)).await?;
        data.dist_id = Some(dist.id);
        data.domain_internal = Some(dist.domain_name);

        let record = Route::<Provisioning>::create(data).into_record();
        self.store.insert(&record).await?;

        Ok(record)
    }

    /// Get the route for a service instance.
    pub async fn get(&self, instance_id: &str) -> RouteResult<RouteRecord> {
        self.store
            .find_by_instance(&InstanceId::new(instance_id))
            .await
    }

    /// Reconcile a route one step forward, if its gates allow.
    ///
    /// Settled routes are a no-op touching no collaborator. A gate that
    /// does not pass is a silent no-op; the driver is expected to call
    /// again later. Errors leave the route in its current state, which is
    /// the retry checkpoint.
    pub async fn update(&self, record: RouteRecord) -> RouteResult<()> {
        let _guard = self.locks.acquire(record.data.instance_id.as_str()).await;

        match AnyRoute::from_record(record) {
            AnyRoute::Provisioning(route) => self.reconcile_provisioning(route).await,
            AnyRoute::Deprovisioning(route) => self.reconcile_deprovisioning(route).await,
            settled => {
                debug!(
                    instance = %settled.data().instance_id,
                    state = %settled.state(),
                    "route is settled, nothing to reconcile"
                );
                Ok(())
            }
        }
    }

    /// Begin deprovisioning a route.
    ///
    /// Disables the distribution and persists the deprovisioning state.
    /// A CDN failure propagates with the stored state unchanged.
    pub async fn disable(&self, record: RouteRecord) -> RouteResult<()> {
        let _guard = self.locks.acquire(record.data.instance_id.as_str()).await;

        let dist_id = record
            .data
            .dist_id
            .clone()
            .ok_or_else(|| RouteError::internal("route has no distribution"))?;

        let disabling = AnyRoute::from_record(record).disable()?;

        self.cdn.disable(&dist_id).await?;
        self.store.save(&disabling.into_record()).await?;

        info!(dist_id = %dist_id, "route disabled, awaiting distribution teardown");
        Ok(())
    }

    /// Renew a route's certificate from its stored ACME resource.
    ///
    /// Deploys the renewed certificate and rewrites the certificate row in
    /// place. On failure the prior row remains unchanged.
    pub async fn renew(&self, record: &RouteRecord) -> RouteResult<()> {
        let _guard = self.locks.acquire(record.data.instance_id.as_str()).await;

        let current = record
            .data
            .certificate
            .as_ref()
            .ok_or_else(|| RouteError::CertificateMissing(record.data.instance_id.to_string()))?;
        let dist_id = record
            .data
            .dist_id
            .as_deref()
            .ok_or_else(|| RouteError::internal("route has no distribution"))?;

        let renewed = self.acme.renew_certificate(&current.resource()).await?;

        self.deploy_certificate(&record.data, dist_id, &renewed)
            .await?;

        let expires = expiration_of(&renewed.certificate)?;
        let updated = current.renewed(renewed, expires);
        self.store.save_certificate(&updated).await?;

        info!(
            instance = %record.data.instance_id,
            expires = %expires,
            "certificate renewed"
        );
        Ok(())
    }

    /// Renew every provisioned route whose certificate expires within the
    /// renewal window.
    ///
    /// Failures are isolated: an error on one route is logged and the
    /// sweep continues. Returns the number of certificates renewed; only a
    /// failure of the selection query itself propagates.
    pub async fn renew_all(&self) -> RouteResult<usize> {
        let threshold = renewal_threshold(Utc::now());
        let due = self.store.renewable(threshold).await?;

        info!(count = due.len(), "checking certificates for renewal");

        let mut renewed = 0;
        for record in &due {
            if record.data.certificate.is_none() {
                warn!(
                    instance = %record.data.instance_id,
                    "route is due for renewal but has no certificate row, skipping"
                );
                continue;
            }

            match self.renew(record).await {
                Ok(()) => renewed += 1,
                Err(e) => {
                    error!(
                        instance = %record.data.instance_id,
                        error = %e,
                        "certificate renewal failed"
                    );
                }
            }
        }

        Ok(renewed)
    }

    async fn reconcile_provisioning(&self, route: Route<Provisioning>) -> RouteResult<()> {
        let data = route.data();

        let dns_ready =
            self.probe.cname_matches(data).await || self.probe.hosts_match(data).await;
        if !dns_ready {
            debug!(
                instance = %data.instance_id,
                "tenant DNS does not point at the distribution yet"
            );
            return Ok(());
        }

        if !self.distribution_ready(data).await {
            debug!(
                instance = %data.instance_id,
                "distribution is still deploying"
            );
            return Ok(());
        }

        let dist_id = data
            .dist_id
            .as_deref()
            .ok_or_else(|| RouteError::internal("route has no distribution"))?
            .to_owned();

        let resource = self.acme.obtain_certificate(&data.domains()).await?;
        self.deploy_certificate(data, &dist_id, &resource).await?;

        let expires = expiration_of(&resource.certificate)?;
        let certificate = Certificate::new(route.id().clone(), resource, expires);

        let instance = data.instance_id.clone();
        let provisioned = route.provision(certificate);
        self.store.save(&provisioned.into_record()).await?;

        info!(instance = %instance, expires = %expires, "route provisioned");
        Ok(())
    }

    async fn reconcile_deprovisioning(&self, route: Route<Deprovisioning>) -> RouteResult<()> {
        let data = route.data();

        let dist_id = data
            .dist_id
            .as_deref()
            .ok_or_else(|| RouteError::internal("route has no distribution"))?;

        let deleted = self.cdn.delete(dist_id).await?;
        if !deleted {
            debug!(
                instance = %data.instance_id,
                dist_id = %dist_id,
                "distribution teardown still propagating"
            );
            return Ok(());
        }

        self.iam
            .delete_certificate(&data.cert_alias(), false)
            .await?;

        let instance = data.instance_id.clone();
        let done = route.deprovision();
        self.store.save(&done.into_record()).await?;

        info!(instance = %instance, "route deprovisioned");
        Ok(())
    }

    /// Install a certificate on a distribution.
    ///
    /// Upload under the staging alias, bind to the distribution, then
    /// promote the staging alias to the canonical name. A crash between
    /// steps leaves either the old certificate bound under the canonical
    /// name or the new one bound and awaiting the rename; a retry
    /// converges either way.
    async fn deploy_certificate(
        &self,
        data: &RouteData,
        dist_id: &str,
        resource: &CertificateResource,
    ) -> RouteResult<()> {
        let staging = data.staging_cert_alias();
        let canonical = data.cert_alias();

        let cert_id = self.iam.upload_certificate(&staging, resource).await?;
        self.cdn.set_certificate(dist_id, &cert_id).await?;
        self.iam.rename_certificate(&staging, &canonical).await
    }

    async fn distribution_ready(&self, data: &RouteData) -> bool {
        let Some(dist_id) = data.dist_id.as_deref() else {
            return false;
        };

        match self.cdn.get(dist_id).await {
            Ok(dist) => dist.is_ready(),
            Err(e) => {
                debug!(dist_id = %dist_id, error = %e, "distribution status check failed");
                false
            }
        }
    }

    fn distribution_request(&self, data: &RouteData) -> DistributionRequest {
        let mut tags = self.settings.tags.clone();
        tags.insert("Instance".to_owned(), data.instance_id.to_string());

        DistributionRequest {
            domains: data.domains(),
            origin: data.origin.clone(),
            path: data.path.clone(),
            insecure_origin: false,
            forwarded_headers: self.settings.forwarded_headers.clone(),
            tags,
        }
    }
}

impl std::fmt::Debug for RouteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CallLog, MockAcme, MockCdn, MockIam, StaticResolver};
    use crate::store::MemoryStore;
    use crate::types::RouteState;

    fn manager() -> (RouteManager, Arc<CallLog>) {
        let log = Arc::new(CallLog::new());
        let resolver = Arc::new(StaticResolver::new());
        let probe = DnsProbe::new(resolver as Arc<dyn crate::dns::DnsResolver>);

        let manager = RouteManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockCdn::new(Arc::clone(&log))),
            Arc::new(MockIam::new(Arc::clone(&log))),
            Arc::new(MockAcme::new(Arc::clone(&log))),
            probe,
            CdnConfig::default(),
        );

        (manager, log)
    }

    #[tokio::test]
    async fn create_stores_cdn_identifiers() {
        let (manager, _log) = manager();

        let record = manager
            .create("inst-1", "a.example.com", "origin.app", "/")
            .await
            .expect("create failed");

        assert_eq!(record.state, RouteState::Provisioning);
        assert!(record.data.dist_id.is_some());
        assert!(record.data.domain_internal.is_some());

        let found = manager.get("inst-1").await.expect("get failed");
        assert_eq!(found.data.id, record.data.id);
    }

    #[tokio::test]
    async fn get_unknown_instance() {
        let (manager, _log) = manager();

        let result = manager.get("missing").await;
        assert!(matches!(result, Err(RouteError::InstanceDoesNotExist(_))));
    }

    #[tokio::test]
    async fn distribution_request_carries_settings() {
        let log = Arc::new(CallLog::new());
        let resolver = Arc::new(StaticResolver::new());
        let probe = DnsProbe::new(resolver as Arc<dyn crate::dns::DnsResolver>);

        let mut settings = CdnConfig::default();
        settings.forwarded_headers = vec!["Host".to_owned(), "Authorization".to_owned()];
        settings.tags.insert("team".to_owned(), "platform".to_owned());

        let manager = RouteManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockCdn::new(Arc::clone(&log))),
            Arc::new(MockIam::new(Arc::clone(&log))),
            Arc::new(MockAcme::new(Arc::clone(&log))),
            probe,
            settings,
        );

        let data = RouteData::new("inst-1", "a.example.com,b.example.com", "origin.app", "/");
        let request = manager.distribution_request(&data);

        assert_eq!(request.domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(request.forwarded_headers, vec!["Host", "Authorization"]);
        assert_eq!(request.tags.get("team").map(String::as_str), Some("platform"));
        assert_eq!(request.tags.get("Instance").map(String::as_str), Some("inst-1"));
    }
}
