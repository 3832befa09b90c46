use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use http::StatusCode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ClientConfig;
use crate::error::Error;
use crate::util::lock_unpoisoned;

const JITTER_LOW: f64 = 0.75;
const JITTER_HIGH: f64 = 1.25;

/// Process-wide generator for backoff jitter. Seeded once from the OS,
/// shared under a mutex so concurrent requests draw from one stream.
fn jitter_factor() -> f64 {
    static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();
    let rng = RNG.get_or_init(|| Mutex::new(StdRng::from_os_rng()));
    lock_unpoisoned(rng).random_range(JITTER_LOW..=JITTER_HIGH)
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    retry_on_timeout: bool,
    retry_on_connection_error: bool,
    retry_on_5xx: bool,
}

impl RetryPolicy {
    pub const fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            retry_on_timeout: false,
            retry_on_connection_error: false,
            retry_on_5xx: false,
        }
    }

    pub(crate) fn from_config(config: &ClientConfig) -> Self {
        if !config.enable_retry {
            return Self::disabled();
        }
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_retry_delay.max(Duration::from_millis(1)),
            backoff_factor: if config.retry_backoff_factor.is_finite()
                && config.retry_backoff_factor >= 1.0
            {
                config.retry_backoff_factor
            } else {
                2.0
            },
            max_delay: config.max_retry_delay.max(config.initial_retry_delay),
            retry_on_timeout: config.retry_on_timeout,
            retry_on_connection_error: config.retry_on_connection_error,
            retry_on_5xx: config.retry_on_5xx,
        }
    }

    pub const fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub(crate) fn retries_status(&self, status: StatusCode) -> bool {
        self.retry_on_5xx && status.is_server_error()
    }

    pub(crate) fn retries_error(&self, error: &Error) -> bool {
        (self.retry_on_timeout && error.is_timeout())
            || (self.retry_on_connection_error && error.is_connection_error())
    }

    /// Backoff for the given 0-based attempt. Attempt 0 gets the initial
    /// delay verbatim; attempt k >= 1 gets `initial * factor^k` scaled by a
    /// uniform jitter in [0.75, 1.25], capped at the configured maximum.
    pub(crate) fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }
        let exponent = attempt.min(64) as i32;
        let base_ms = self.initial_delay.as_secs_f64() * 1_000.0 * self.backoff_factor.powi(exponent);
        let jittered_ms = base_ms * jitter_factor();
        let capped = Duration::from_secs_f64((jittered_ms / 1_000.0).max(0.0));
        capped.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-`execute` retry bookkeeping. One instance lives for the whole
/// top-level call; attempts are 0-based.
#[derive(Debug)]
pub(crate) struct RetryState {
    policy: RetryPolicy,
    attempt: usize,
}

impl RetryState {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub(crate) fn attempt(&self) -> usize {
        self.attempt
    }

    fn attempts_remaining(&self) -> bool {
        self.attempt < self.policy.max_retries()
    }

    pub(crate) fn should_retry(&self, error: Option<&Error>, status: Option<StatusCode>) -> bool {
        if !self.attempts_remaining() {
            return false;
        }
        if let Some(error) = error
            && self.policy.retries_error(error)
        {
            return true;
        }
        if let Some(status) = status
            && self.policy.retries_status(status)
        {
            return true;
        }
        false
    }

    /// Consumes one attempt and returns how long to sleep before the next.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        delay
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;

    use super::{RetryPolicy, RetryState};
    use crate::config::ClientConfig;
    use crate::error::{Error, TimeoutPhase};

    fn policy(max_retries: usize) -> RetryPolicy {
        let mut config = ClientConfig::default();
        config.enable_retry = true;
        config.max_retries = max_retries;
        config.initial_retry_delay = Duration::from_millis(100);
        config.retry_backoff_factor = 2.0;
        config.max_retry_delay = Duration::from_secs(10);
        RetryPolicy::from_config(&config)
    }

    #[test]
    fn attempt_zero_uses_initial_delay_unjittered() {
        assert_eq!(policy(3).delay(0), Duration::from_millis(100));
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        // initial=100ms, factor=2.0: attempt 2 must land in [300ms, 500ms].
        let policy = policy(5);
        for _ in 0..64 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(300), "delay {delay:?} too low");
            assert!(delay <= Duration::from_millis(500), "delay {delay:?} too high");
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut config = ClientConfig::default();
        config.enable_retry = true;
        config.initial_retry_delay = Duration::from_millis(100);
        config.retry_backoff_factor = 2.0;
        config.max_retry_delay = Duration::from_millis(250);
        let policy = RetryPolicy::from_config(&config);
        for attempt in 1..16 {
            assert!(policy.delay(attempt) <= Duration::from_millis(250));
        }
    }

    #[test]
    fn classification_gates_each_failure_kind() {
        let mut config = ClientConfig::default();
        config.enable_retry = true;
        config.max_retries = 3;
        config.retry_on_timeout = false;
        config.retry_on_connection_error = true;
        config.retry_on_5xx = false;
        let state = RetryState::new(RetryPolicy::from_config(&config));

        let timeout = Error::Timeout {
            phase: TimeoutPhase::Read,
            timeout_ms: 100,
        };
        let connect = Error::Connect {
            origin: "example.com:80".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(!state.should_retry(Some(&timeout), None));
        assert!(state.should_retry(Some(&connect), None));
        assert!(!state.should_retry(None, Some(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(!state.should_retry(None, Some(StatusCode::OK)));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut state = RetryState::new(policy(2));
        let error = Error::Timeout {
            phase: TimeoutPhase::Connect,
            timeout_ms: 1,
        };
        assert!(state.should_retry(Some(&error), None));
        let _ = state.next_delay();
        assert!(state.should_retry(Some(&error), None));
        let _ = state.next_delay();
        assert!(!state.should_retry(Some(&error), None));
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn disabled_policy_never_retries() {
        let state = RetryState::new(RetryPolicy::disabled());
        let error = Error::Timeout {
            phase: TimeoutPhase::Request,
            timeout_ms: 1,
        };
        assert!(!state.should_retry(Some(&error), None));
    }
}
