//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RunnerConfig;
use crate::error::RunErrorKind;

const TRANSIENT_MARKERS: [&str; 11] = [
    "timeout",
    "timed out",
    "connection reset",
    "econnreset",
    "rate limit",
    "429",
    "503",
    "unavailable",
    "too many requests",
    "etimedout",
    "socket hang up",
];

/// Transient failures are worth another attempt; everything else is fatal.
pub fn classify(message: &str) -> RunErrorKind {
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        RunErrorKind::Transient
    } else {
        RunErrorKind::Fatal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    pub fn from_config(runner: &RunnerConfig) -> Self {
        Self::new(runner.max_attempts, runner.backoff_base())
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// Classification of the final error, if the operation failed.
    pub kind: Option<RunErrorKind>,
}

/// Run `op` until it succeeds, fails fatally, or uses up `policy.max_attempts`.
/// `on_retry(attempt, delay, &error)` is called before each backoff sleep.
pub async fn run_with_retry<T, E, F, Fut, R>(policy: &RetryPolicy, mut op: F, mut on_retry: R) -> Retried<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, Duration, &E),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                    kind: None,
                };
            }
            Err(error) => {
                let kind = classify(&error.to_string());
                if kind != RunErrorKind::Transient || attempt >= policy.max_attempts {
                    return Retried {
                        result: Err(error),
                        attempts: attempt,
                        kind: Some(kind),
                    };
                }
                let delay = policy.delay_for(attempt);
                on_retry(attempt, delay, &error);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn classifies_transient_markers() {
        for msg in [
            "LLM request timed out: deadline",
            "LLM API Error 429: slow down",
            "LLM API Error 503: Service Unavailable",
            "read ECONNRESET",
            "Rate limit reached for requests",
            "socket hang up",
        ] {
            assert_eq!(classify(msg), RunErrorKind::Transient, "{msg}");
        }
        assert_eq!(classify("LLM API Error 401: invalid key"), RunErrorKind::Fatal);
        assert_eq!(classify("agent not found"), RunErrorKind::Fatal);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_stop_at_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut calls = 0;
        let mut delays = Vec::new();
        let started = Instant::now();
        let out: Retried<(), String> = run_with_retry(
            &policy,
            |_| {
                calls += 1;
                async { Err("503 unavailable".to_string()) }
            },
            |_, delay, _| delays.push(delay),
        )
        .await;
        assert_eq!(calls, 3);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.kind, Some(RunErrorKind::Transient));
        assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut calls = 0;
        let out: Retried<(), String> = run_with_retry(
            &policy,
            |_| {
                calls += 1;
                async { Err("invalid api key".to_string()) }
            },
            |_, _, _| {},
        )
        .await;
        assert_eq!(calls, 1);
        assert_eq!(out.kind, Some(RunErrorKind::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let out: Retried<u32, String> = run_with_retry(
            &policy,
            |attempt| async move {
                if attempt == 1 {
                    Err("connection reset by peer".to_string())
                } else {
                    Ok(attempt)
                }
            },
            |_, _, _| {},
        )
        .await;
        assert_eq!(out.result.unwrap(), 2);
        assert_eq!(out.attempts, 2);
        assert!(out.kind.is_none());
    }
}
