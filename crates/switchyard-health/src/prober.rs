//! Bounded readiness polling.
//!
//! Polls a target at a fixed interval until it reports ready, the attempt
//! budget is spent, or the wall-clock budget runs out, whichever comes
//! first. No attempt starts once the wall-clock budget is spent, and each
//! request is clipped to the time that remains.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use switchyard_core::ConfigError;
use switchyard_core::config::HealthConfig;

use crate::checker::{ProbeAttempt, ProbeResult, http_check};

/// Retry budget for one probe cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Wall-clock budget for the whole cycle.
    pub timeout: Duration,
    /// Delay between attempts.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Bound on a single request.
    pub request_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(5),
            max_attempts: 24,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ProbePolicy {
    pub fn from_config(config: &HealthConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            timeout: config.timeout()?,
            interval: config.interval()?,
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout()?,
        })
    }

    /// Same policy with a different wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Verdict of a probe cycle. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    pub target: String,
    pub passed: bool,
    pub attempts: u32,
    /// Duration of the last attempt.
    pub latency: Option<Duration>,
    /// Total time spent in the cycle.
    pub elapsed: Duration,
    /// HTTP status of the last response, if any.
    pub last_status: Option<u16>,
    /// Why the last attempt did not pass.
    pub last_error: Option<String>,
}

impl HealthVerdict {
    fn start(target: &str) -> Self {
        Self {
            target: target.to_string(),
            passed: false,
            attempts: 0,
            latency: None,
            elapsed: Duration::ZERO,
            last_status: None,
            last_error: None,
        }
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        if self.passed {
            format!(
                "ready after {} attempt(s) in {:.1}s",
                self.attempts,
                self.elapsed.as_secs_f64()
            )
        } else {
            format!(
                "not ready after {} attempt(s) in {:.1}s: {}",
                self.attempts,
                self.elapsed.as_secs_f64(),
                self.last_error.as_deref().unwrap_or("no attempt was made")
            )
        }
    }
}

/// Boxed future returned by [`Prober::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = HealthVerdict> + Send + 'a>>;

/// Readiness verification, injected into the release controller.
pub trait Prober: Send + Sync {
    /// Poll `target` under `policy` and report the verdict.
    fn probe<'a>(&'a self, target: &'a str, policy: &'a ProbePolicy) -> ProbeFuture<'a>;
}

/// [`Prober`] issuing HTTP readiness checks.
#[derive(Debug, Clone, Default)]
pub struct HttpProber;

impl Prober for HttpProber {
    fn probe<'a>(&'a self, target: &'a str, policy: &'a ProbePolicy) -> ProbeFuture<'a> {
        Box::pin(async move {
            poll_until_ready(target, policy, |timeout| async move {
                http_check(target, timeout).await
            })
            .await
        })
    }
}

/// Drive `check` under `policy` until it reports ready or a bound trips.
///
/// `check` receives the time allowed for that attempt; the loop also
/// enforces it, so a hung check counts as a failed attempt.
pub async fn poll_until_ready<F, Fut>(
    target: &str,
    policy: &ProbePolicy,
    mut check: F,
) -> HealthVerdict
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = ProbeAttempt>,
{
    let started = Instant::now();
    // No wall-clock bound when the budget is past what `Instant` can hold.
    let deadline = started.checked_add(policy.timeout);
    let remaining = || match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    };
    let mut verdict = HealthVerdict::start(target);

    debug!(
        %target,
        timeout = ?policy.timeout,
        interval = ?policy.interval,
        max_attempts = policy.max_attempts,
        "probing readiness"
    );

    while verdict.attempts < policy.max_attempts {
        let left = remaining();
        if left.is_zero() {
            break;
        }

        let allowed = policy.request_timeout.min(left);
        let attempt_started = Instant::now();
        let attempt = match tokio::time::timeout(allowed, check(allowed)).await {
            Ok(attempt) => attempt,
            Err(_) => ProbeAttempt::failed(format!("timed out after {}ms", allowed.as_millis())),
        };
        verdict.attempts += 1;
        verdict.latency = Some(attempt_started.elapsed());
        verdict.last_status = attempt.status;

        if attempt.result == ProbeResult::Ready {
            verdict.passed = true;
            verdict.last_error = None;
            break;
        }

        debug!(
            %target,
            attempt = verdict.attempts,
            result = ?attempt.result,
            detail = ?attempt.detail,
            "target not ready yet"
        );
        verdict.last_error = attempt.detail;

        if verdict.attempts >= policy.max_attempts {
            break;
        }
        // The next attempt would start at or past the deadline.
        if policy.interval >= remaining() {
            break;
        }
        tokio::time::sleep(policy.interval).await;
    }

    verdict.elapsed = started.elapsed();
    if verdict.passed {
        info!(%target, attempts = verdict.attempts, elapsed = ?verdict.elapsed, "target is ready");
    } else {
        warn!(
            %target,
            attempts = verdict.attempts,
            elapsed = ?verdict.elapsed,
            last_error = ?verdict.last_error,
            "target did not become ready"
        );
    }
    verdict
}
