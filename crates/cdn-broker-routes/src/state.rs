//! Typestate pattern for the route lifecycle.
//!
//! Route states are encoded in the type system so that a route can never
//! move backwards: only the transitions below exist, and each consumes the
//! previous state.
//!
//! ```text
//! Provisioning ──▶ Provisioned ──▶ Deprovisioning ──▶ Deprovisioned
//!      │                               ▲
//!      └───────── disable ─────────────┘
//! ```
//!
//! A tenant may deprovision before DNS ever converged, so `Provisioning`
//! can be disabled directly.

use std::marker::PhantomData;

use crate::error::{RouteError, RouteResult};
use crate::types::{Certificate, InstanceId, RouteData, RouteId, RouteRecord, RouteState};

/// Marker trait for route lifecycle states.
pub trait RouteLifecycle: private::Sealed + Send + Sync {
    /// Get the persisted state representation.
    fn persisted() -> RouteState;

    /// Get the state name for error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Distribution created; waiting on tenant DNS and deploy propagation.
#[derive(Debug, Clone, Copy)]
pub struct Provisioning;

/// Certificate installed; the route is live.
#[derive(Debug, Clone, Copy)]
pub struct Provisioned;

/// Distribution disabled; waiting for teardown to complete.
#[derive(Debug, Clone, Copy)]
pub struct Deprovisioning;

/// Distribution deleted and certificate removed.
#[derive(Debug, Clone, Copy)]
pub struct Deprovisioned;

impl private::Sealed for Provisioning {}
impl private::Sealed for Provisioned {}
impl private::Sealed for Deprovisioning {}
impl private::Sealed for Deprovisioned {}

impl RouteLifecycle for Provisioning {
    fn persisted() -> RouteState {
        RouteState::Provisioning
    }
    fn name() -> &'static str {
        "provisioning"
    }
}

impl RouteLifecycle for Provisioned {
    fn persisted() -> RouteState {
        RouteState::Provisioned
    }
    fn name() -> &'static str {
        "provisioned"
    }
}

impl RouteLifecycle for Deprovisioning {
    fn persisted() -> RouteState {
        RouteState::Deprovisioning
    }
    fn name() -> &'static str {
        "deprovisioning"
    }
}

impl RouteLifecycle for Deprovisioned {
    fn persisted() -> RouteState {
        RouteState::Deprovisioned
    }
    fn name() -> &'static str {
        "deprovisioned"
    }
}

/// A route in a specific lifecycle state.
///
/// The state parameter `S` determines which transitions are available.
#[derive(Debug)]
pub struct Route<S: RouteLifecycle> {
    /// The underlying route data.
    data: RouteData,
    /// Zero-sized state marker.
    _state: PhantomData<S>,
}

impl<S: RouteLifecycle> Route<S> {
    /// Get a reference to the route data.
    #[must_use]
    pub const fn data(&self) -> &RouteData {
        &self.data
    }

    /// Get the route ID.
    #[must_use]
    pub const fn id(&self) -> &RouteId {
        &self.data.id
    }

    /// Get the service instance ID.
    #[must_use]
    pub const fn instance_id(&self) -> &InstanceId {
        &self.data.instance_id
    }

    /// Get the current state as a persisted value.
    #[must_use]
    pub fn state(&self) -> RouteState {
        S::persisted()
    }

    /// Convert into the persisted record form.
    #[must_use]
    pub fn into_record(self) -> RouteRecord {
        RouteRecord {
            data: self.data,
            state: S::persisted(),
        }
    }

    /// Internal helper to transition to a new state.
    fn transition<T: RouteLifecycle>(mut self) -> Route<T> {
        self.data.updated_at = chrono::Utc::now();
        Route {
            data: self.data,
            _state: PhantomData,
        }
    }

    /// Internal helper to transition with data modification.
    fn transition_with<T: RouteLifecycle>(
        mut self,
        f: impl FnOnce(&mut RouteData),
    ) -> Route<T> {
        f(&mut self.data);
        self.data.updated_at = chrono::Utc::now();
        Route {
            data: self.data,
            _state: PhantomData,
        }
    }
}

impl Route<Provisioning> {
    /// Create a new route in the provisioning state.
    #[must_use]
    pub const fn create(data: RouteData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Transition to provisioned, attaching the installed certificate.
    #[must_use]
    pub fn provision(self, certificate: Certificate) -> Route<Provisioned> {
        self.transition_with(|data| {
            data.certificate = Some(certificate);
        })
    }

    /// Transition to deprovisioning without ever having been live.
    #[must_use]
    pub fn disable(self) -> Route<Deprovisioning> {
        self.transition()
    }
}

impl Route<Provisioned> {
    /// Transition to deprovisioning.
    #[must_use]
    pub fn disable(self) -> Route<Deprovisioning> {
        self.transition()
    }
}

impl Route<Deprovisioning> {
    /// Transition to deprovisioned once teardown has completed.
    #[must_use]
    pub fn deprovision(self) -> Route<Deprovisioned> {
        self.transition_with(|data| {
            data.deleted_at = Some(chrono::Utc::now());
        })
    }
}

/// A type-erased route that can be in any state.
///
/// Used when loading from the store, where the state is not known at
/// compile time.
#[derive(Debug)]
pub enum AnyRoute {
    /// Route in the provisioning state.
    Provisioning(Route<Provisioning>),
    /// Route in the provisioned state.
    Provisioned(Route<Provisioned>),
    /// Route in the deprovisioning state.
    Deprovisioning(Route<Deprovisioning>),
    /// Route in the deprovisioned state.
    Deprovisioned(Route<Deprovisioned>),
}

impl AnyRoute {
    /// Create an `AnyRoute` from data and a persisted state.
    #[must_use]
    pub fn from_persisted(data: RouteData, state: RouteState) -> Self {
        match state {
            RouteState::Provisioning => Self::Provisioning(Route {
                data,
                _state: PhantomData,
            }),
            RouteState::Provisioned => Self::Provisioned(Route {
                data,
                _state: PhantomData,
            }),
            RouteState::Deprovisioning => Self::Deprovisioning(Route {
                data,
                _state: PhantomData,
            }),
            RouteState::Deprovisioned => Self::Deprovisioned(Route {
                data,
                _state: PhantomData,
            }),
        }
    }

    /// Create an `AnyRoute` from a persisted record.
    #[must_use]
    pub fn from_record(record: RouteRecord) -> Self {
        Self::from_persisted(record.data, record.state)
    }

    /// Get a reference to the route data.
    #[must_use]
    pub const fn data(&self) -> &RouteData {
        match self {
            Self::Provisioning(r) => r.data(),
            Self::Provisioned(r) => r.data(),
            Self::Deprovisioning(r) => r.data(),
            Self::Deprovisioned(r) => r.data(),
        }
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> RouteState {
        match self {
            Self::Provisioning(_) => RouteState::Provisioning,
            Self::Provisioned(_) => RouteState::Provisioned,
            Self::Deprovisioning(_) => RouteState::Deprovisioning,
            Self::Deprovisioned(_) => RouteState::Deprovisioned,
        }
    }

    /// Whether the route is settled: reconciliation has nothing to do.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Provisioned(_) | Self::Deprovisioned(_))
    }

    /// Begin deprovisioning.
    ///
    /// Returns an error if the route is already deprovisioning or gone.
    pub fn disable(self) -> RouteResult<Route<Deprovisioning>> {
        match self {
            Self::Provisioning(r) => Ok(r.disable()),
            Self::Provisioned(r) => Ok(r.disable()),
            other => Err(RouteError::InvalidStateTransition {
                from: other.state().as_str(),
                to: "deprovisioning",
            }),
        }
    }
}
