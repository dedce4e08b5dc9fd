use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Bounded retry with a fixed, escalating delay schedule.
///
/// Used for lock waits on files, transient host faults, and the settle wait
/// between closing documents and moving them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delays in milliseconds before retry 1, 2, ...; the last entry repeats
    pub delays_ms: Vec<u64>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays_ms: Vec<u64>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays_ms,
        }
    }

    /// Retries without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Vec::new())
    }

    /// Attempts actually made; a deserialized `0` still runs once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the given retry (1 = first retry)
    pub fn delay_before(&self, retry: u32) -> Duration {
        let index = retry.saturating_sub(1) as usize;
        let ms = self
            .delays_ms
            .get(index)
            .or_else(|| self.delays_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number so callers can run recovery
    /// steps (save/reopen) before later attempts.
    pub fn run<T, E, F, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_before(attempt);
                    debug!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label, attempt, max_attempts, e, delay
                    );
                    sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll `ready` until it reports true or attempts run out. Returns whether it became ready.
    pub fn wait_until<F>(&self, label: &str, mut ready: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let max_attempts = self.attempts();
        for attempt in 1..=max_attempts {
            if ready() {
                return true;
            }
            if attempt < max_attempts {
                let delay = self.delay_before(attempt);
                debug!(
                    "Waiting for {} (attempt {}/{}), sleeping {:?}",
                    label, attempt, max_attempts, delay
                );
                sleep(delay);
            }
        }
        false
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, vec![500, 1000, 2000])
    }
}

/// Fixed barrier wait that lets the OS release file handles held by the host
pub fn settle(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    info!("Waiting {:?} for file locks to clear", duration);
    sleep(duration);
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule_repeats_last_entry() {
        let policy = RetryPolicy::new(5, vec![10, 20]);
        assert_eq!(policy.delay_before(1), Duration::from_millis(10));
        assert_eq!(policy.delay_before(2), Duration::from_millis(20));
        assert_eq!(policy.delay_before(4), Duration::from_millis(20));
        assert_eq!(RetryPolicy::immediate(3).delay_before(1), Duration::ZERO);
    }

    #[test]
    fn test_run_retries_until_success() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0;
        let result: Result<u32, String> = policy.run(
            "flaky",
            |attempt| {
                calls += 1;
                if attempt < 3 {
                    Err("busy".to_string())
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        );
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_run_stops_on_non_retryable() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0;
        let result: Result<(), String> = policy.run(
            "fatal",
            |_| {
                calls += 1;
                Err("unsupported".to_string())
            },
            |e| e != "unsupported",
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_run_gives_up_after_max_attempts() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0;
        let result: Result<(), String> = policy.run(
            "locked",
            |_| {
                calls += 1;
                Err("locked".to_string())
            },
            |_| true,
        );
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_wait_until() {
        let policy = RetryPolicy::immediate(3);
        let mut polls = 0;
        assert!(policy.wait_until("lock", || {
            polls += 1;
            polls == 2
        }));

        let mut never = 0;
        assert!(!policy.wait_until("lock", || {
            never += 1;
            false
        }));
        assert_eq!(never, 3);
    }

    #[test]
    fn test_zero_attempts_from_config_still_runs_once() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 0, "delays_ms": []}"#).unwrap();
        assert_eq!(policy.attempts(), 1);

        let mut polls = 0;
        assert!(policy.wait_until("lock", || {
            polls += 1;
            true
        }));
        assert_eq!(polls, 1);

        let mut calls = 0;
        let result: Result<(), String> = policy.run(
            "move",
            |_| {
                calls += 1;
                Err("locked".to_string())
            },
            |_| true,
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
