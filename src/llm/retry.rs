use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How a failed attempt should be treated by a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection, DNS or other transport level failure.
    Transport,
    /// The server answered with a non-success status.
    Status,
    /// The response body was not the expected JSON envelope.
    MalformedResponse,
    /// Caller input error. Never retried.
    Fatal,
}

pub trait RetryableError: Display {
    fn failure_kind(&self) -> FailureKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// Doubles after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    pub fn none() -> Self {
        Backoff::None
    }

    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed(delay)
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff::Exponential { initial, max }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Retry policy shared by the chat clients.
///
/// The default retries every transient failure forever with no delay, logging
/// each failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    backoff: Backoff,
    retry_malformed: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::None,
            retry_malformed: true,
        }
    }

    /// Total number of attempts, including the first one. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retry_malformed(mut self, retry: bool) -> Self {
        self.retry_malformed = retry;
        self
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    fn is_retryable(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::Transport | FailureKind::Status => true,
            FailureKind::MalformedResponse => self.retry_malformed,
            FailureKind::Fatal => false,
        }
    }

    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, E>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(err.failure_kind()) {
                return Err(err);
            }
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                tracing::error!(attempts, error = %err, "Giving up after repeated failures");
                return Err(err);
            }

            tracing::warn!(attempt = attempts, error = %err, "Network Error, retrying");
            let delay = self.backoff.delay(attempts);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
