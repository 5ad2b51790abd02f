use crate::types::ChangeResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Blocking wait between polls
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared cancellation flag, cheap to clone across threads
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { elapsed: Duration },
    Cancelled,
}

/// Fixed-interval polling with an optional timeout and a cancellation token.
///
/// Elapsed time is the sum of the intervals slept, so a timeout of `n * interval`
/// allows exactly `n + 1` checks.
#[derive(Clone)]
pub struct Poller {
    interval: Duration,
    timeout: Option<Duration>,
    cancel: CancelToken,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
            cancel: CancelToken::new(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `check` until it yields a value, the timeout elapses or the token is cancelled.
    ///
    /// `check` receives the zero-based attempt number. Errors from `check` end the loop.
    pub fn poll<T, F>(&self, mut check: F) -> ChangeResult<PollOutcome<T>>
    where
        F: FnMut(u32) -> ChangeResult<Option<T>>,
    {
        let mut elapsed = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                log::warn!("Polling cancelled after {} attempt(s)", attempt);
                return Ok(PollOutcome::Cancelled);
            }

            if let Some(value) = check(attempt)? {
                return Ok(PollOutcome::Ready(value));
            }
            attempt += 1;

            if let Some(timeout) = self.timeout {
                if elapsed + self.interval > timeout {
                    log::warn!("Polling timed out after {:?} ({} attempts)", elapsed, attempt);
                    return Ok(PollOutcome::TimedOut { elapsed });
                }
            }

            self.sleeper.sleep(self.interval);
            elapsed += self.interval;
        }
    }
}
