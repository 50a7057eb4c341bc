//! Bounded, paced, retrying dispatch of service calls.
//!
//! Every completion and embedding call in a run goes through one
//! [`RequestDispatcher`]:
//!
//! - at most `concurrency` calls are in flight at once;
//! - successive calls start at least `dispatch_interval` apart;
//! - each attempt is cut off after `timeout`;
//! - retryable failures (see [`ServiceError::is_retryable`]) back off
//!   exponentially with ±25% jitter, up to `max_attempts` attempts in total.
//!
//! A unit that exhausts its attempts fails alone; [`RequestDispatcher::dispatch_all`]
//! returns one result per unit, in input order.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, warn};

use crate::service::ServiceError;

/// Dispatcher knobs, usually filled from the `[dispatch]` config section.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub concurrency: usize,
    pub dispatch_interval: Duration,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            dispatch_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(60),
            max_attempts: 4,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// A unit of work that failed for good.
#[derive(Error, Debug)]
#[error("{unit} failed after {attempts} attempt(s): {source}")]
pub struct DispatchError {
    pub unit: String,
    pub attempts: u32,
    #[source]
    pub source: ServiceError,
}

pub struct RequestDispatcher {
    settings: DispatchSettings,
    permits: Semaphore,
    next_slot: Mutex<Instant>,
}

impl RequestDispatcher {
    pub fn new(settings: DispatchSettings) -> Self {
        let permits = Semaphore::new(settings.concurrency.max(1));
        Self {
            settings,
            permits,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Wait for this caller's dispatch slot and reserve the next one.
    async fn pace(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.settings.dispatch_interval;
            slot
        };
        sleep_until(slot).await;
    }

    async fn attempt<T, Fut>(&self, fut: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ServiceError::Transport("dispatcher closed".into()))?;
        self.pace().await;
        match timeout(self.settings.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(self.settings.timeout)),
        }
    }

    /// Run `op` until it succeeds, fails terminally, or runs out of attempts.
    /// The concurrency permit is released while backing off.
    pub async fn call<T, F, Fut>(&self, unit: &str, mut op: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(op()).await {
                Ok(value) => {
                    debug!(unit, attempt, "dispatch ok");
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(
                        attempt,
                        e.retry_after(),
                        self.settings.base_backoff,
                        self.settings.max_backoff,
                    );
                    let delay_ms = delay.as_millis() as u64;
                    warn!(unit, attempt, delay_ms, error = %e, "retrying");
                    sleep(delay).await;
                }
                Err(e) => {
                    return Err(DispatchError {
                        unit: unit.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Launch one call per unit and join them all. Results line up with `units`.
    pub async fn dispatch_all<'u, U, T, F, Fut>(
        &self,
        phase: &str,
        units: &'u [U],
        op: F,
    ) -> Vec<Result<T, DispatchError>>
    where
        F: Fn(&'u U) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let op = &op;
        join_all(units.iter().enumerate().map(|(i, unit)| async move {
            let name = format!("{phase}[{i}]");
            self.call(&name, || op(unit)).await
        }))
        .await
    }
}

/// Un-jittered backoff for a 1-based attempt: `base * 2^(attempt-1)`, capped.
pub fn backoff_window(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exp).min(max)
}

/// Backoff with ±25% jitter, never shorter than the server's `Retry-After`.
pub fn backoff_delay(
    attempt: u32,
    retry_after: Option<Duration>,
    base: Duration,
    max: Duration,
) -> Duration {
    let jittered = backoff_window(attempt, base, max).mul_f64(rand::random_range(0.75..=1.25));
    match retry_after {
        Some(hint) => jittered.max(hint),
        None => jittered,
    }
}
