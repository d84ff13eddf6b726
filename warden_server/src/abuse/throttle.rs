//! Login throttle
//!
//! Counts login attempts per opaque key (usually a username) and clears the
//! whole table on a fixed period rather than tracking a window per key. A
//! key whose attempts straddle a reset can get up to twice the nominal
//! allowance before it is blocked.
//!
//! Two call patterns share the one counter:
//! - check-then-note: [`LoginThrottle::is_login_attempt_blocked`] before the
//!   password check and [`LoginThrottle::note_failed_login`] only on failure
//! - note-and-decrement: [`LoginThrottle::note_login`] on every attempt and
//!   [`LoginThrottle::note_login_success`] to give a successful one back

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use warden_common::constants;

/// Throttle configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Attempts allowed per period
    pub max_attempts: u32,
    /// How often every counter is cleared
    pub period: Duration,
}

impl ThrottleConfig {
    pub fn new(max_attempts: u32, period_secs: u64) -> Self {
        Self {
            max_attempts,
            period: Duration::from_secs(period_secs),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(
            constants::DEFAULT_LOGIN_MAX_ATTEMPTS,
            constants::DEFAULT_LOGIN_THROTTLE_PERIOD_SECONDS,
        )
    }
}

pub struct LoginThrottle {
    config: ThrottleConfig,
    attempts: DashMap<String, u32>,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            attempts: DashMap::new(),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Count an attempt and report whether it may proceed
    pub fn note_login(&self, key: &str) -> bool {
        let count = self.increment(key);
        let allowed = count <= self.config.max_attempts;
        if !allowed {
            tracing::info!("Throttling login for {} ({} attempts)", key, count);
        }
        allowed
    }

    /// Give back one attempt after a successful login. Never drops below zero.
    pub fn note_login_success(&self, key: &str) {
        if let Some(mut count) = self.attempts.get_mut(key) {
            *count = count.saturating_sub(1);
        }
        self.attempts.remove_if(key, |_, count| *count == 0);
    }

    /// True once the key has used up its attempts for this period.
    /// Does not count as an attempt.
    pub fn is_login_attempt_blocked(&self, key: &str) -> bool {
        let count = self.attempts(key);
        let blocked = count > self.config.max_attempts;
        if blocked {
            tracing::info!("Throttling login for {} ({} attempts)", key, count);
        }
        blocked
    }

    /// Count a failed attempt. Returns true when the user should be warned
    /// that further attempts will be refused.
    pub fn note_failed_login(&self, key: &str) -> bool {
        let count = self.increment(key);
        let warn = count > self.config.max_attempts;
        if warn {
            tracing::info!("Throttling login for {} ({} failed attempts)", key, count);
        }
        warn
    }

    /// Attempts counted for `key` in the current period
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Clear every counter
    pub fn reset(&self) {
        let keys = self.attempts.len();
        self.attempts.clear();
        if keys > 0 {
            tracing::debug!("Cleared login throttle ({} keys)", keys);
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    fn increment(&self, key: &str) -> u32 {
        let mut count = self.attempts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

/// Start the task that clears the throttle table every period
pub fn spawn_reset_task(
    throttle: Arc<LoginThrottle>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(throttle.config().period);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    throttle.reset();
                }
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Login throttle reset task shutting down");
                        break;
                    }
                }
            }
        }
    })
}
