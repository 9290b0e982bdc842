//! DNS probe for tenant domain readiness.
//!
//! Pure read-side checks: has the tenant pointed their external domains at
//! the distribution yet? Two independent predicates are offered; either
//! passing is sufficient. CNAME covers alias-style setups, the host check
//! covers apex domains served via A/AAAA records.
//!
//! Resolver failures are soft: a domain that cannot be resolved is simply
//! not ready yet, never an error to propagate.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use crate::error::{RouteError, RouteResult};
use crate::types::RouteData;

/// Record lookups the probe needs.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// The CNAME target of `host`, if one exists.
    ///
    /// Targets are returned in presentation form with the trailing dot.
    async fn lookup_cname(&self, host: &str) -> RouteResult<Option<String>>;

    /// All A/AAAA addresses of `host`. Empty when the name has none.
    async fn lookup_hosts(&self, host: &str) -> RouteResult<Vec<IpAddr>>;
}

/// Resolver backed by the system DNS configuration.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Create a resolver from the system configuration.
    pub fn from_system_conf() -> RouteResult<Self> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| RouteError::dns(e.to_string()))?;
        Ok(Self { inner })
    }
}

fn is_no_records(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup_cname(&self, host: &str) -> RouteResult<Option<String>> {
        match self.inner.lookup(host, RecordType::CNAME).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .find_map(|rdata| rdata.as_cname().map(|cname| cname.0.to_utf8()))),
            Err(e) if is_no_records(&e) => Ok(None),
            Err(e) => Err(RouteError::dns(e.to_string())),
        }
    }

    async fn lookup_hosts(&self, host: &str) -> RouteResult<Vec<IpAddr>> {
        match self.inner.lookup_ip(host).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) if is_no_records(&e) => Ok(Vec::new()),
            Err(e) => Err(RouteError::dns(e.to_string())),
        }
    }
}

impl std::fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

/// Read-side checks over a route's external domains.
#[derive(Clone)]
pub struct DnsProbe {
    resolver: Arc<dyn DnsResolver>,
}

impl DnsProbe {
    /// Create a probe over the given resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Whether every external domain's CNAME points at the distribution.
    ///
    /// The expected target is `<domain_internal>.` with the trailing dot;
    /// comparison is ASCII-case-insensitive.
    pub async fn cname_matches(&self, route: &RouteData) -> bool {
        let Some(internal) = route.domain_internal.as_deref() else {
            return false;
        };
        let expected = format!("{internal}.");

        for domain in route.domains() {
            match self.resolver.lookup_cname(&domain).await {
                Ok(Some(cname)) if cname.eq_ignore_ascii_case(&expected) => {}
                Ok(observed) => {
                    debug!(
                        domain = %domain,
                        expected = %expected,
                        observed = ?observed,
                        "CNAME does not point at the distribution"
                    );
                    return false;
                }
                Err(e) => {
                    debug!(domain = %domain, error = %e, "CNAME lookup failed");
                    return false;
                }
            }
        }

        true
    }

    /// Whether every external domain resolves to the same address set as
    /// the distribution.
    ///
    /// Sets are compared as sorted sequences, so answer ordering does not
    /// matter.
    pub async fn hosts_match(&self, route: &RouteData) -> bool {
        let Some(internal) = route.domain_internal.as_deref() else {
            return false;
        };

        let expected = match self.resolver.lookup_hosts(internal).await {
            Ok(hosts) if !hosts.is_empty() => sorted(hosts),
            Ok(_) => {
                debug!(host = %internal, "distribution hostname has no addresses");
                return false;
            }
            Err(e) => {
                debug!(host = %internal, error = %e, "address lookup failed");
                return false;
            }
        };

        for domain in route.domains() {
            match self.resolver.lookup_hosts(&domain).await {
                Ok(observed) => {
                    if sorted(observed) != expected {
                        debug!(domain = %domain, "address set differs from the distribution");
                        return false;
                    }
                }
                Err(e) => {
                    debug!(domain = %domain, error = %e, "address lookup failed");
                    return false;
                }
            }
        }

        true
    }
}

fn sorted(mut hosts: Vec<IpAddr>) -> Vec<IpAddr> {
    hosts.sort();
    hosts
}

impl std::fmt::Debug for DnsProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsProbe").finish_non_exhaustive()
    }
}
