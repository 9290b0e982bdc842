//! Route storage backends.
//!
//! This module provides the trait and implementations for persisting
//! routes and their certificates. The primary implementation uses
//! PostgreSQL; an in-memory implementation is provided for testing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RouteResult;
use crate::types::{Certificate, InstanceId, RouteRecord};

/// Backend for storing route records and their certificates.
///
/// A route logically owns its certificate: `save` persists the attached
/// row alongside the route, and deleting a route cascades to the
/// certificate.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Insert a new route record.
    ///
    /// Fails with [`crate::RouteError::InstanceAlreadyExists`] when a route
    /// for the same service instance already exists.
    async fn insert(&self, record: &RouteRecord) -> RouteResult<()>;

    /// Upsert a route record by its primary key, including the attached
    /// certificate when present.
    async fn save(&self, record: &RouteRecord) -> RouteResult<()>;

    /// Get the route for a service instance, certificate eagerly attached.
    ///
    /// Fails with [`crate::RouteError::InstanceDoesNotExist`] when absent.
    async fn find_by_instance(&self, instance_id: &InstanceId) -> RouteResult<RouteRecord>;

    /// Rewrite a certificate row in place (renewal).
    async fn save_certificate(&self, certificate: &Certificate) -> RouteResult<()>;

    /// Provisioned routes whose certificate expires strictly before the
    /// threshold, certificates eagerly attached, soonest expiry first.
    async fn renewable(&self, threshold: DateTime<Utc>) -> RouteResult<Vec<RouteRecord>>;
}
