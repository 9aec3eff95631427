//! Pacing primitives for outbound work.
//!
//! [`BatchWindow`] runs items in fixed-size concurrent windows with a pause
//! between windows. [`Pacer`] enforces a minimum interval between starts.
//! [`RetryPolicy`] bounds how often one request is retried.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;

/// Fixed-size concurrency window with an inter-window pause.
///
/// At most `size` futures are in flight at any moment; results are returned
/// in input order.
#[derive(Debug, Clone, Copy)]
pub struct BatchWindow {
    size: usize,
    pause: Duration,
}

impl BatchWindow {
    /// A window of `size` items (clamped to at least 1).
    pub fn new(size: usize, pause: Duration) -> Self {
        Self {
            size: size.max(1),
            pause,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over every item, window by window.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut iter = items.into_iter().peekable();

        while iter.peek().is_some() {
            let window: Vec<Fut> = iter.by_ref().take(self.size).map(&f).collect();
            results.extend(join_all(window).await);

            if iter.peek().is_some() && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        debug!(total, window = self.size, "batch window complete");
        results
    }
}

/// Enforces a minimum interval between successive calls to [`Pacer::wait`].
///
/// The first call returns immediately.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Sleep until `interval` has elapsed since the previous call.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Bounded retry with linearly increasing delay.
///
/// Attempt `n` that fails with a retryable error is followed by a sleep of
/// `n × delay`. Non-retryable errors and the last attempt's error are
/// returned as-is.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// A policy of `max_attempts` tries (clamped to at least 1).
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `label` identifies the request in logs and must not carry secrets.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    warn!(label, attempt, max_attempts = self.max_attempts, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(self.delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
