use crate::types::{Limits, ServiceError, ServiceFailure};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A remote request/response service reached through the throttled client.
#[async_trait]
pub trait RemoteService: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;

    fn service_name(&self) -> &str;

    /// Perform exactly one attempt. Pacing and retries are the caller's job.
    async fn invoke(&self, request: &Self::Request) -> Result<Self::Response, ServiceFailure>;
}

/// Time of the last dispatched request to one service.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    pub last_request: Option<Instant>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_request = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry(Duration),
    Fail(ServiceError),
}

/// Exponential retry schedule: `base_delay × 2^retry`, at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.max_retries, limits.base_delay())
    }

    pub fn schedule(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << self.max_retries.min(24));
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: ceiling,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Every delay the policy would wait, in order.
    pub fn delays(&self) -> Vec<Duration> {
        let mut schedule = self.schedule();
        (0..self.max_retries)
            .filter_map(|_| schedule.next_backoff())
            .collect()
    }

    /// Classify one failed attempt. `retries` is the number of retries already made.
    pub fn decide(
        &self,
        failure: ServiceFailure,
        retries: u32,
        schedule: &mut impl Backoff,
        service: &str,
    ) -> RetryDecision {
        if !failure.is_retryable() || retries >= self.max_retries {
            return RetryDecision::Fail(failure.into_terminal(service, retries));
        }
        match schedule.next_backoff() {
            Some(delay) => {
                let delay = match failure.retry_after() {
                    Some(hint) if hint > delay => hint,
                    _ => delay,
                };
                RetryDecision::Retry(delay)
            }
            None => RetryDecision::Fail(failure.into_terminal(service, retries)),
        }
    }
}

/// Paces and retries calls against one remote service.
///
/// The client holds no mutable state; the caller passes the service's
/// `RateState` on every call so pacing is scoped to a run.
pub struct ThrottledClient<S> {
    service: S,
    limits: Limits,
    policy: RetryPolicy,
}

impl<S: RemoteService> ThrottledClient<S> {
    pub fn new(service: S, limits: Limits) -> Self {
        let policy = RetryPolicy::from_limits(&limits);
        debug!(
            "{} client: {:?} between requests, retry delays {:?}",
            service.service_name(),
            limits.min_interval(),
            policy.delays()
        );
        Self {
            service,
            policy,
            limits,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn call(
        &self,
        rate: &mut RateState,
        request: &S::Request,
    ) -> Result<S::Response, ServiceError> {
        let name = self.service.service_name();
        let mut schedule = self.policy.schedule();
        let mut retries = 0u32;

        loop {
            self.pace(rate).await;

            let outcome = match tokio::time::timeout(
                self.limits.request_timeout(),
                self.service.invoke(request),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ServiceFailure::transient(format!(
                    "request timed out after {:?}",
                    self.limits.request_timeout()
                ))),
            };

            let failure = match outcome {
                Ok(response) => {
                    if retries > 0 {
                        info!("{} succeeded after {} retries", name, retries);
                    }
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            match self.policy.decide(failure.clone(), retries, &mut schedule, name) {
                RetryDecision::Retry(delay) => {
                    retries += 1;
                    warn!(
                        "{} {}, retrying in {:?} (attempt {}/{})",
                        name, failure, delay, retries, self.policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Fail(err) => {
                    error!("{} call failed: {}", name, err);
                    return Err(err);
                }
            }
        }
    }

    async fn pace(&self, rate: &mut RateState) {
        let min_interval = self.limits.min_interval();
        if let Some(last_request) = rate.last_request {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!(
                    "Rate limiting {}: waiting {:?}",
                    self.service.service_name(),
                    wait_time
                );
                tokio::time::sleep(wait_time).await;
            }
        }
        rate.last_request = Some(Instant::now());
    }
}
