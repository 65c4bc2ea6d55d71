use serde::Serialize;
use smallvec::SmallVec;

use crate::resilience::{Endpoint, breaker::BreakerState};

/// Breaker state of one external endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    pub endpoint: Endpoint,
    pub state: BreakerState,
}

/// Operational snapshot the HTTP layer's health endpoint serves.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// The local cache tier is in-process and always reachable; reported
    /// for symmetry with the shared tier.
    pub cache_ok: bool,
    pub shared_cache_ok: bool,
    pub audit_queue_depth: usize,
    /// Set when a batch missed the audit persist deadline since startup.
    pub audit_alert: bool,
    pub breaker_states: SmallVec<[EndpointHealth; 3]>,
}
