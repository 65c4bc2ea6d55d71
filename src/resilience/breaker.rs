use std::{sync::Mutex, time::Duration};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{config::EndpointPolicy, error::ResilienceError, resilience::Endpoint};

/// Externally visible breaker state, reported by the health probe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

enum Inner {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { in_flight: u32, successes: u32 },
}

/// Outcome accounting handle for one admitted call.
///
/// Every token returned by [`CircuitBreaker::try_acquire`] must be handed
/// back through exactly one of `record_success`, `record_failure` or
/// `record_abandon`, or half-open probe slots leak.
#[derive(Debug)]
pub struct CallToken {
    probe: bool,
}

/// Per-endpoint circuit breaker shared by every request in the process.
///
/// CLOSED trips to OPEN after `max_failures` consecutive failures; OPEN
/// fails fast until `recovery_timeout` elapses, then HALF_OPEN admits at
/// most `half_open_probes` concurrent probes; `half_open_successes`
/// successful probes close it again, any failure re-opens it. State lives
/// for the process lifetime and is never persisted.
pub struct CircuitBreaker {
    endpoint: Endpoint,
    max_failures: u32,
    recovery_timeout: Duration,
    half_open_probes: u32,
    half_open_successes: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: Endpoint, policy: &EndpointPolicy) -> Self {
        Self {
            endpoint,
            max_failures: policy.max_failures,
            recovery_timeout: policy.recovery_timeout,
            half_open_probes: policy.half_open_probes,
            half_open_successes: policy.half_open_successes,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Admits or rejects a call. Rejection is immediate and performs no I/O.
    pub fn try_acquire(&self) -> Result<CallToken, ResilienceError> {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            Inner::Closed { .. } => Ok(CallToken { probe: false }),
            Inner::Open { opened_at } => {
                if opened_at.elapsed() >= self.recovery_timeout {
                    info!(endpoint = %self.endpoint, "Circuit half-open, admitting probe");
                    *inner = Inner::HalfOpen {
                        in_flight: 1,
                        successes: 0,
                    };
                    Ok(CallToken { probe: true })
                } else {
                    Err(ResilienceError::EndpointOpen {
                        endpoint: self.endpoint.to_string(),
                    })
                }
            }
            Inner::HalfOpen { in_flight, .. } => {
                if *in_flight < self.half_open_probes {
                    *in_flight += 1;
                    Ok(CallToken { probe: true })
                } else {
                    Err(ResilienceError::EndpointOpen {
                        endpoint: self.endpoint.to_string(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self, token: CallToken) {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            Inner::HalfOpen {
                in_flight,
                successes,
            } if token.probe => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= self.half_open_successes {
                    info!(endpoint = %self.endpoint, "Circuit closed after successful probes");
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                    };
                }
            }
            // Late completions from before a transition carry no signal.
            _ => {}
        }
    }

    pub fn record_failure(&self, token: CallToken) {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.max_failures {
                    warn!(
                        endpoint = %self.endpoint,
                        failures = *consecutive_failures,
                        recovery = %humantime::format_duration(self.recovery_timeout),
                        "Circuit opened"
                    );
                    *inner = Inner::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!(endpoint = %self.endpoint, probe = token.probe, "Probe failed, circuit re-opened");
                *inner = Inner::Open {
                    opened_at: Instant::now(),
                };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Releases an admitted call without counting it either way, e.g. when
    /// the parent request was cancelled.
    pub fn record_abandon(&self, token: CallToken) {
        if !token.probe {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Inner::HalfOpen { in_flight, .. } = &mut *inner {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    pub fn state(&self) -> BreakerState {
        match &*self.inner.lock().unwrap() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}
