//! Background certificate renewal sweeper.
//!
//! Periodically drives [`RouteManager::renew_all`]. The selection and the
//! per-route isolation live in the manager; this is just the ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::RenewalConfig;
use crate::manager::RouteManager;

/// Default check interval (12 hours).
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour).
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Background renewal sweeper.
pub struct RenewalSweeper {
    manager: Arc<RouteManager>,
    check_interval: Duration,
}

impl RenewalSweeper {
    /// Create a new sweeper with the default interval.
    #[must_use]
    pub fn new(manager: Arc<RouteManager>) -> Self {
        Self {
            manager,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Create a sweeper from configuration.
    #[must_use]
    pub fn from_config(manager: Arc<RouteManager>, config: &RenewalConfig) -> Self {
        Self::new(manager).with_interval(Duration::from_secs(config.check_interval_secs))
    }

    /// Set the check interval.
    ///
    /// The interval is clamped to a minimum of 1 hour to avoid excessive
    /// polling.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    /// Run the sweep loop indefinitely.
    ///
    /// A failing sweep is logged and the loop continues; the next tick
    /// retries from the store.
    pub async fn run(self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            "starting certificate renewal sweeper"
        );

        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            debug!("running scheduled certificate renewal sweep");

            match self.manager.renew_all().await {
                Ok(0) => debug!("no certificates due for renewal"),
                Ok(renewed) => info!(renewed, "renewal sweep completed"),
                Err(e) => error!(error = %e, "renewal sweep failed"),
            }
        }
    }
}

impl std::fmt::Debug for RenewalSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalSweeper")
            .field("check_interval", &self.check_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdnConfig;
    use crate::dns::{DnsProbe, DnsResolver};
    use crate::mock::{CallLog, MockAcme, MockCdn, MockIam, StaticResolver};
    use crate::store::MemoryStore;

    fn test_manager() -> Arc<RouteManager> {
        let log = Arc::new(CallLog::new());
        let resolver = Arc::new(StaticResolver::new());

        Arc::new(RouteManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockCdn::new(Arc::clone(&log))),
            Arc::new(MockIam::new(Arc::clone(&log))),
            Arc::new(MockAcme::new(Arc::clone(&log))),
            DnsProbe::new(resolver as Arc<dyn DnsResolver>),
            CdnConfig::default(),
        ))
    }

    #[test]
    fn interval_is_clamped_to_minimum() {
        let sweeper =
            RenewalSweeper::new(test_manager()).with_interval(Duration::from_secs(60));
        assert_eq!(sweeper.check_interval, MIN_CHECK_INTERVAL);
    }

    #[test]
    fn configured_interval_is_used() {
        let config = RenewalConfig {
            check_interval_secs: 6 * 3600,
        };
        let sweeper = RenewalSweeper::from_config(test_manager(), &config);
        assert_eq!(sweeper.check_interval, Duration::from_secs(6 * 3600));
    }
}
