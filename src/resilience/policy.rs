use std::{future::Future, time::Duration};

use tokio::{
    sync::Semaphore,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::EndpointPolicy,
    error::{ClientError, FetchError, ResilienceError},
    resilience::{
        Endpoint,
        breaker::{BreakerState, CircuitBreaker},
        retry::RetryPolicy,
    },
};

/// The time budget one request carries through its child fetches.
///
/// Children derive their per-attempt deadline from whatever remains of the
/// parent budget; when it expires, in-flight work is cancelled and the data
/// service substitutes fallbacks for anything still missing.
pub struct RequestBudget {
    deadline: Instant,
    token: CancellationToken,
}

impl RequestBudget {
    /// Starts a budget that cancels itself `timeout` from now.
    pub fn start(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let token = CancellationToken::new();
        let sleeper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sleeper.cancel();
        });
        Self { deadline, token }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.token.is_cancelled() || self.remaining().is_zero()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// The resilience wrapper around one external endpoint.
///
/// Composes, in order: a per-attempt timeout, a bounded retry loop that only
/// retries transient failures, and the shared circuit breaker. A concurrency
/// cap independent of the breaker bounds in-flight calls.
pub struct EndpointGuard {
    endpoint: Endpoint,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    concurrency: Semaphore,
}

impl EndpointGuard {
    pub fn new(endpoint: Endpoint, policy: &EndpointPolicy) -> Self {
        Self {
            endpoint,
            breaker: CircuitBreaker::new(endpoint, policy),
            retry: RetryPolicy::new(policy),
            attempt_timeout: policy.attempt_timeout,
            concurrency: Semaphore::new(policy.max_concurrency),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Runs `op` under the endpoint's resilience policy.
    ///
    /// `op` receives the deadline its attempt must honor. Terminal client
    /// errors (404, contract violations) pass through unretried and do not
    /// count against the breaker; transient ones consume the retry budget.
    /// A breaker rejection fails fast without touching the retry budget.
    pub async fn call<T, F, Fut>(&self, budget: &RequestBudget, op: F) -> Result<T, FetchError>
    where
        F: Fn(Duration) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("endpoint semaphore is never closed");

        let mut last_error = String::new();
        for attempt in 0..self.retry.max_attempts() {
            if budget.expired() {
                return Err(ResilienceError::EndpointTimeout {
                    endpoint: self.endpoint.to_string(),
                }
                .into());
            }

            let token = self.breaker.try_acquire().map_err(FetchError::Resilience)?;
            let per_attempt = self.attempt_timeout.min(budget.remaining());

            let outcome = tokio::select! {
                _ = budget.cancelled() => {
                    self.breaker.record_abandon(token);
                    return Err(ResilienceError::EndpointTimeout {
                        endpoint: self.endpoint.to_string(),
                    }
                    .into());
                }
                outcome = timeout(per_attempt, op(per_attempt)) => outcome,
            };

            match outcome {
                Ok(Ok(value)) => {
                    self.breaker.record_success(token);
                    return Ok(value);
                }
                Ok(Err(error)) if !error.is_transient() => {
                    // The endpoint answered; the answer just wasn't data.
                    self.breaker.record_success(token);
                    return Err(FetchError::Client(error));
                }
                Ok(Err(error)) => {
                    self.breaker.record_failure(token);
                    debug!(endpoint = %self.endpoint, attempt, %error, "Transient failure");
                    last_error = error.to_string();
                }
                Err(_) => {
                    self.breaker.record_failure(token);
                    debug!(endpoint = %self.endpoint, attempt, "Attempt timed out");
                    last_error = format!(
                        "attempt timed out after {}",
                        humantime::format_duration(per_attempt)
                    );
                }
            }

            if attempt + 1 < self.retry.max_attempts() {
                let pause = self.retry.backoff(attempt).min(budget.remaining());
                tokio::select! {
                    _ = budget.cancelled() => {
                        return Err(ResilienceError::EndpointTimeout {
                            endpoint: self.endpoint.to_string(),
                        }
                        .into());
                    }
                    _ = sleep(pause) => {}
                }
            }
        }

        Err(ResilienceError::Unavailable {
            endpoint: self.endpoint.to_string(),
            last_error,
        }
        .into())
    }
}
