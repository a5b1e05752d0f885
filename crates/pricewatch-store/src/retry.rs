use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Bounded retry for transient filesystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff
            .saturating_mul(1 << retry.min(MAX_BACKOFF_SHIFT))
            .min(MAX_BACKOFF)
    }

    pub fn run<T>(
        &self,
        operation: &'static str,
        path: &Path,
        mut attempt: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        let mut retry = 0;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && retry < self.attempts => {
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        operation,
                        path = %path.display(),
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store error, retrying"
                    );
                    thread::sleep(delay);
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
