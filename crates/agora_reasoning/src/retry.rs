//! Bounded retries for text-generation calls.
//!
//! A citizen waits on the generator inside its decision and conversation
//! cycles, so retries are capped by a total time budget as well as an
//! attempt count. Rate-limit replies may name their own wait through
//! `Retry-After`.

use anyhow::{bail, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first.
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
    /// Wall time after which no further attempt is started.
    pub budget: Duration,
}

impl RetryPolicy {
    pub fn within(budget: Duration) -> Self {
        Self {
            attempts: 3,
            first_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            budget,
        }
    }

    /// Wait before attempt `attempt + 1`, given the failed attempt number
    /// (1-based). A server-provided wait wins but is still capped.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let doubled = self
            .first_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        retry_after.unwrap_or(doubled).min(self.max_delay)
    }

    fn fits(&self, started: Instant, wait: Duration) -> bool {
        started.elapsed() + wait < self.budget
    }
}

/// Rate limits, timeouts and server faults are worth another try; any other
/// failure status is the caller's problem.
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Run `send` until it yields a success status, a non-transient failure,
/// or the policy runs out of attempts or time.
pub async fn send_with_retry<F, Fut>(policy: &RetryPolicy, provider: &str, send: F) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Response>>,
{
    let started = Instant::now();
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=policy.attempts.max(1) {
        let hint = match send().await {
            Ok(response) if response.status().is_success() => {
                if attempt > 1 {
                    tracing::debug!(provider, attempt, "generator recovered");
                }
                return Ok(response);
            }
            Ok(response) => {
                let status = response.status();
                let hint = retry_after(&response);
                let text = response.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(200).collect();
                if !is_transient(status) {
                    bail!("{provider} rejected the request ({status}): {snippet}");
                }
                last_error = format!("{status}: {snippet}");
                hint
            }
            Err(e) => {
                last_error = format!("{e:#}");
                None
            }
        };

        if attempt == policy.attempts {
            break;
        }
        let wait = policy.delay_for(attempt, hint);
        if !policy.fits(started, wait) {
            tracing::warn!(provider, attempt, "generator retry budget spent");
            break;
        }
        tracing::warn!(
            provider,
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %last_error,
            "generator call failed, retrying"
        );
        tokio::time::sleep(wait).await;
    }

    bail!("{provider} unavailable: {last_error}")
}
