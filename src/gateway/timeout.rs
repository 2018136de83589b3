//! Execution Timeout Management
//!
//! A backend call that never returns would hold its execution slot forever.
//! Every backend therefore carries an optional deadline.

use std::time::Duration;
use tokio::time;

/// Default deadline for one backend invocation
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// The deadline expired before the future completed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Command execution timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Execution timeout configuration
///
/// `None` means the call may run for as long as the backend takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    duration: Option<Duration>,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::from_secs(DEFAULT_TIMEOUT_SECS)
    }
}

impl ExecutionTimeout {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
        }
    }

    /// No deadline at all
    pub fn unbounded() -> Self {
        Self { duration: None }
    }

    /// Create a timeout from seconds, `0` meaning unbounded
    ///
    /// # Example
    ///
    /// ```
    /// use cligate::gateway::ExecutionTimeout;
    ///
    /// assert!(ExecutionTimeout::from_secs(0).duration().is_none());
    /// assert_eq!(ExecutionTimeout::from_secs(30).duration().unwrap().as_secs(), 30);
    /// ```
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::unbounded()
        } else {
            Self::new(Duration::from_secs(secs))
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Execute a future with the configured deadline
    ///
    /// The future is dropped when the deadline expires, so resources it owns
    /// (such as a child process spawned with `kill_on_drop`) are released.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, TimedOut>
    where
        F: std::future::Future,
    {
        match self.duration {
            Some(duration) => time::timeout(duration, future)
                .await
                .map_err(|_| TimedOut(duration)),
            None => Ok(future.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(
            ExecutionTimeout::from_secs(45).duration(),
            Some(Duration::from_secs(45))
        );
        assert_eq!(ExecutionTimeout::from_secs(0), ExecutionTimeout::unbounded());
    }

    #[tokio::test]
    async fn test_timeout_run_returns_value() {
        let timeout = ExecutionTimeout::from_secs(5);
        let result = timeout.run(async { "test value".to_string() }).await;
        assert_eq!(result.unwrap(), "test value");
    }

    #[tokio::test]
    async fn test_timeout_run_timeout() {
        let timeout = ExecutionTimeout::new(Duration::from_millis(50));
        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err, TimedOut(Duration::from_millis(50)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unbounded_waits() {
        let timeout = ExecutionTimeout::unbounded();
        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            })
            .await;
        assert_eq!(result, Ok(7));
    }
}
