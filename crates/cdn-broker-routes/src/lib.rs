//! CDN Route Broker — Route Manager
//!
//! This crate is the core of a service broker that provisions CDN edge
//! distributions fronted by automatically issued TLS certificates for
//! tenant domains. It drives each service instance (a *route*) through a
//! reconciliation state machine, coordinating three external
//! collaborators: the CDN control plane, the IAM server-certificate
//! store, and an ACME client.
//!
//! # Architecture
//!
//! - **Store** ([`store`]): durable persistence of routes and
//!   certificates, with the indexed queries the reconciler needs
//! - **DNS probe** ([`dns`]): read-side checks that the tenant has
//!   pointed their domains at the distribution
//! - **Reconciler and facade** ([`manager`]): per-route state machine
//!   transitions behind the public `Create`/`Get`/`Update`/`Disable`/
//!   `Renew`/`RenewAll` surface, serialised per instance
//! - **Renewal sweeper** ([`sweeper`]): periodic driver that renews
//!   near-expiry certificates
//!
//! # State machine
//!
//! Routes move strictly forward, enforced at compile time by the
//! typestate in [`state`]:
//!
//! ```text
//! Provisioning ──▶ Provisioned ──▶ Deprovisioning ──▶ Deprovisioned
//! ```
//!
//! Progress depends on facts outside the broker: the tenant's DNS records
//! and the CDN's deploy propagation. The reconciler evaluates those gates
//! on every tick and silently defers until they pass, so every operation
//! is safe to retry; the persisted state is the retry checkpoint.
//!
//! # Certificate deployment
//!
//! Installing a certificate is a strict three-step dance: upload to IAM
//! under a staging alias, bind the distribution's viewer TLS to it, then
//! promote the staging alias to the canonical name. A crash between steps
//! leaves either the old certificate still bound under the canonical name
//! or the new one bound and awaiting the rename — a retry converges
//! either way.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use cdn_broker_routes::{
//!     BrokerConfig, DnsProbe, PostgresStore, RouteManager, SystemResolver,
//! };
//!
//! let config = BrokerConfig::load()?;
//! let store = Arc::new(PostgresStore::connect(&config.database).await?);
//! let resolver = Arc::new(SystemResolver::from_system_conf()?);
//!
//! let manager = RouteManager::new(
//!     store,
//!     cdn,   // CDN control plane handle
//!     iam,   // IAM certificate store handle
//!     acme,  // ACME client handle
//!     DnsProbe::new(resolver),
//!     config.cdn.clone(),
//! );
//!
//! let route = manager.create("inst-1", "www.tenant.example", "origin.app", "/").await?;
//! ```

#![forbid(unsafe_code)]

pub mod cert;
pub mod cloud;
pub mod config;
pub mod dns;
pub mod error;
pub mod lock;
pub mod manager;
pub mod mock;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod types;

// Re-export commonly used types at the crate root
pub use cert::expiration_of;
pub use cloud::{AcmeBackend, CdnBackend, IamBackend};
pub use config::{BrokerConfig, CdnConfig, DatabaseConfig, RenewalConfig};
pub use dns::{DnsProbe, DnsResolver, SystemResolver};
pub use error::{RouteError, RouteResult};
pub use lock::{InstanceGuard, InstanceLocks};
pub use manager::RouteManager;
pub use state::{
    AnyRoute, Deprovisioned, Deprovisioning, Provisioned, Provisioning, Route, RouteLifecycle,
};
pub use store::{MemoryStore, PostgresStore, RouteStore};
pub use sweeper::RenewalSweeper;
pub use types::{
    renewal_threshold, Certificate, CertificateId, CertificateResource, Distribution,
    DistributionRequest, DistributionStatus, InstanceId, RouteData, RouteId, RouteRecord,
    RouteState, RENEW_BEFORE_DAYS,
};
