//! Cancellable, time-budgeted polling.
//!
//! [`poll_until`] repeatedly runs a probe on a fixed interval until it
//! reports a terminal result, the elapsed budget runs out, or the
//! [`CancellationToken`] fires. Time is read through a [`Clock`] so tests
//! can run a full 600-second budget without sleeping.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Source of monotonic time and sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by [`tokio::time`].
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time for tests: `sleep` advances the clock and returns at once.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// How often to probe and for how long in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(T),
    /// Not done yet, or a transient failure worth retrying.
    Pending,
    /// Terminal failure; stop polling.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("Gave up after {}s ({attempts} attempts)", elapsed.as_secs())]
    TimedOut { elapsed: Duration, attempts: u32 },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Poll `probe` every `budget.interval` until it is ready or fails, the
/// budget is spent, or `cancel` fires.
///
/// The probe receives the 1-based attempt number. A probe still running
/// when the budget ends is abandoned and counts as pending.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    budget: PollBudget,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, WaitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let start = clock.now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        let elapsed = clock.now().saturating_sub(start);
        if elapsed >= budget.timeout {
            return Err(WaitError::TimedOut { elapsed, attempts });
        }

        attempts += 1;
        let remaining = budget.timeout - elapsed;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            outcome = tokio::time::timeout(remaining, probe(attempts)) => {
                outcome.unwrap_or(Probe::Pending)
            }
        };

        match outcome {
            Probe::Ready(value) => return Ok(value),
            Probe::Failed(reason) => return Err(WaitError::Failed(reason)),
            Probe::Pending => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            _ = clock.sleep(budget.interval) => {}
        }
    }
}
