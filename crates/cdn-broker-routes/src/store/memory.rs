//! In-memory route store for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RouteError, RouteResult};
use crate::types::{Certificate, InstanceId, RouteRecord, RouteState};

use super::RouteStore;

/// In-memory route store for testing.
///
/// Data is lost when the process exits; not suitable for production use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    routes: RwLock<HashMap<String, RouteRecord>>,
    instances: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn insert(&self, record: &RouteRecord) -> RouteResult<()> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        let instance_key = record.data.instance_id.as_str().to_owned();
        if instances.contains_key(&instance_key) {
            return Err(RouteError::InstanceAlreadyExists(instance_key));
        }

        let mut routes = self
            .routes
            .write()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        instances.insert(instance_key, record.data.id.as_str().to_owned());
        routes.insert(record.data.id.as_str().to_owned(), record.clone());
        Ok(())
    }

    async fn save(&self, record: &RouteRecord) -> RouteResult<()> {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        let mut instances = self
            .instances
            .write()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        instances.insert(
            record.data.instance_id.as_str().to_owned(),
            record.data.id.as_str().to_owned(),
        );
        routes.insert(record.data.id.as_str().to_owned(), record.clone());
        Ok(())
    }

    async fn find_by_instance(&self, instance_id: &InstanceId) -> RouteResult<RouteRecord> {
        let instances = self
            .instances
            .read()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        let route_id = instances
            .get(instance_id.as_str())
            .ok_or_else(|| RouteError::InstanceDoesNotExist(instance_id.to_string()))?;

        let routes = self
            .routes
            .read()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        routes
            .get(route_id)
            .cloned()
            .ok_or_else(|| RouteError::InstanceDoesNotExist(instance_id.to_string()))
    }

    async fn save_certificate(&self, certificate: &Certificate) -> RouteResult<()> {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        let record = routes
            .get_mut(certificate.route_id.as_str())
            .ok_or_else(|| {
                RouteError::internal(format!(
                    "certificate references unknown route: {}",
                    certificate.route_id
                ))
            })?;

        record.data.certificate = Some(certificate.clone());
        Ok(())
    }

    async fn renewable(&self, threshold: DateTime<Utc>) -> RouteResult<Vec<RouteRecord>> {
        let routes = self
            .routes
            .read()
            .map_err(|_| RouteError::internal("lock poisoned"))?;

        let mut due: Vec<_> = routes
            .values()
            .filter(|r| {
                r.state == RouteState::Provisioned
                    && r.data
                        .certificate
                        .as_ref()
                        .is_some_and(|c| c.expires < threshold)
            })
            .cloned()
            .collect();

        due.sort_by_key(|r| {
            r.data
                .certificate
                .as_ref()
                .map(|c| c.expires)
                .unwrap_or(threshold)
        });

        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CertificateResource, RouteData};

    fn test_record(instance_id: &str) -> RouteRecord {
        let mut data = RouteData::new(instance_id, "a.example.com", "origin.app", "/");
        data.dist_id = Some("dist-000001".to_owned());
        data.domain_internal = Some("d1.cdn.example".to_owned());
        RouteRecord::new(data)
    }

    fn test_certificate(record: &RouteRecord, expires: DateTime<Utc>) -> Certificate {
        Certificate::new(
            record.data.id.clone(),
            CertificateResource {
                domain: "a.example.com".to_owned(),
                cert_url: "https://acme.invalid/cert/1".to_owned(),
                certificate: b"pem".to_vec(),
            },
            expires,
        )
    }

    #[tokio::test]
    async fn insert_and_find() {
        let store = MemoryStore::new();

        let record = test_record("inst-1");
        store.insert(&record).await.expect("insert failed");

        let found = store
            .find_by_instance(&InstanceId::new("inst-1"))
            .await
            .expect("find failed");

        assert_eq!(found.data.id, record.data.id);
        assert_eq!(found.state, RouteState::Provisioning);
    }

    #[tokio::test]
    async fn duplicate_instance_conflicts() {
        let store = MemoryStore::new();

        store
            .insert(&test_record("inst-1"))
            .await
            .expect("first insert failed");

        let result = store.insert(&test_record("inst-1")).await;
        assert!(matches!(result, Err(RouteError::InstanceAlreadyExists(_))));
    }

    #[tokio::test]
    async fn find_missing_instance() {
        let store = MemoryStore::new();

        let result = store.find_by_instance(&InstanceId::new("missing")).await;
        assert!(matches!(result, Err(RouteError::InstanceDoesNotExist(_))));
    }

    #[tokio::test]
    async fn save_upserts_state_and_certificate() {
        let store = MemoryStore::new();

        let mut record = test_record("inst-1");
        store.insert(&record).await.expect("insert failed");

        let cert = test_certificate(&record, Utc::now() + chrono::Duration::days(90));
        record.data.certificate = Some(cert);
        record.state = RouteState::Provisioned;
        store.save(&record).await.expect("save failed");

        let found = store
            .find_by_instance(&InstanceId::new("inst-1"))
            .await
            .expect("find failed");

        assert_eq!(found.state, RouteState::Provisioned);
        assert!(found.data.certificate.is_some());
    }

    #[tokio::test]
    async fn save_certificate_rewrites_in_place() {
        let store = MemoryStore::new();

        let mut record = test_record("inst-1");
        let cert = test_certificate(&record, Utc::now() + chrono::Duration::days(10));
        record.data.certificate = Some(cert.clone());
        record.state = RouteState::Provisioned;
        store.insert(&record).await.expect("insert failed");

        let new_expires = Utc::now() + chrono::Duration::days(90);
        let renewed = cert.renewed(
            CertificateResource {
                domain: "a.example.com".to_owned(),
                cert_url: "https://acme.invalid/cert/1".to_owned(),
                certificate: b"new-pem".to_vec(),
            },
            new_expires,
        );
        store
            .save_certificate(&renewed)
            .await
            .expect("save_certificate failed");

        let found = store
            .find_by_instance(&InstanceId::new("inst-1"))
            .await
            .expect("find failed");

        let stored = found.data.certificate.expect("certificate missing");
        assert_eq!(stored.id, cert.id);
        assert_eq!(stored.expires, new_expires);
        assert_eq!(stored.certificate, b"new-pem");
    }

    #[tokio::test]
    async fn renewable_selects_provisioned_routes_below_threshold() {
        let store = MemoryStore::new();
        let threshold = Utc::now() + chrono::Duration::days(30);

        // Due: provisioned, expires within the window.
        let mut due = test_record("inst-due");
        due.data.certificate = Some(test_certificate(&due, threshold - chrono::Duration::days(5)));
        due.state = RouteState::Provisioned;
        store.insert(&due).await.expect("insert failed");

        // Not due: expires past the window.
        let mut later = test_record("inst-later");
        later.data.certificate =
            Some(test_certificate(&later, threshold + chrono::Duration::days(30)));
        later.state = RouteState::Provisioned;
        store.insert(&later).await.expect("insert failed");

        // Not due: still provisioning.
        let mut pending = test_record("inst-pending");
        pending.data.certificate =
            Some(test_certificate(&pending, threshold - chrono::Duration::days(5)));
        store.insert(&pending).await.expect("insert failed");

        let records = store.renewable(threshold).await.expect("renewable failed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.instance_id.as_str(), "inst-due");
    }

    #[tokio::test]
    async fn renewable_threshold_is_strict() {
        let store = MemoryStore::new();
        let threshold = Utc::now() + chrono::Duration::days(30);

        let mut exact = test_record("inst-exact");
        exact.data.certificate = Some(test_certificate(&exact, threshold));
        exact.state = RouteState::Provisioned;
        store.insert(&exact).await.expect("insert failed");

        let mut just_under = test_record("inst-under");
        just_under.data.certificate = Some(test_certificate(
            &just_under,
            threshold - chrono::Duration::seconds(1),
        ));
        just_under.state = RouteState::Provisioned;
        store.insert(&just_under).await.expect("insert failed");

        let records = store.renewable(threshold).await.expect("renewable failed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.instance_id.as_str(), "inst-under");
    }

    #[tokio::test]
    async fn renewable_orders_by_soonest_expiry() {
        let store = MemoryStore::new();
        let threshold = Utc::now() + chrono::Duration::days(30);

        let mut second = test_record("inst-second");
        second.data.certificate =
            Some(test_certificate(&second, threshold - chrono::Duration::days(1)));
        second.state = RouteState::Provisioned;
        store.insert(&second).await.expect("insert failed");

        let mut first = test_record("inst-first");
        first.data.certificate =
            Some(test_certificate(&first, threshold - chrono::Duration::days(10)));
        first.state = RouteState::Provisioned;
        store.insert(&first).await.expect("insert failed");

        let records = store.renewable(threshold).await.expect("renewable failed");
        let order: Vec<_> = records
            .iter()
            .map(|r| r.data.instance_id.as_str())
            .collect();
        assert_eq!(order, vec!["inst-first", "inst-second"]);
    }
}
