//! Timeout-bounded mutual exclusion for the decision, action and
//! conversation sections.

use agora_core::AgentError;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

pub struct TimedMutex<T> {
    section: &'static str,
    timeout: Duration,
    inner: Mutex<T>,
}

impl<T> TimedMutex<T> {
    pub fn new(section: &'static str, timeout: Duration, value: T) -> Self {
        Self {
            section,
            timeout,
            inner: Mutex::new(value),
        }
    }

    pub fn section(&self) -> &'static str {
        self.section
    }

    /// Acquire within the configured timeout.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, T>, AgentError> {
        self.try_acquire(self.timeout).await
    }

    /// Acquire within `timeout`, or report a `LockTimeout` for this section.
    pub async fn try_acquire(&self, timeout: Duration) -> Result<MutexGuard<'_, T>, AgentError> {
        match tokio::time::timeout(timeout, self.inner.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::debug!(section = self.section, ?timeout, "guard busy");
                Err(AgentError::LockTimeout {
                    section: self.section,
                    timeout,
                })
            }
        }
    }
}
