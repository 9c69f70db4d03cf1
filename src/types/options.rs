//! Engine options and configuration
//!
//! This module contains the configuration options for the session engine,
//! including a builder pattern and consistency checks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SessionError};

// ============================================================================
// Defaults
// ============================================================================

const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_GRACE_PERIOD_SECS: u64 = 3600;
const DEFAULT_PLANNER_ATTEMPTS: u32 = 3;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 8;
const DEFAULT_REPLY_POLL_SECS: u64 = 10;
const DEFAULT_RECONCILE_SECS: u64 = 120;
const DEFAULT_STARTER_POLL_SECS: u64 = 5;
const DEFAULT_MAX_DAILY_CONVERSATIONS: usize = 3;
const DEFAULT_DECISION_LOG_CAPACITY: usize = 64;
const DEFAULT_DAY_START_HOUR: u32 = 8;
const DEFAULT_DAY_END_HOUR: u32 = 22;
const DEFAULT_BIND_PORT: u16 = 9000;

// ============================================================================
// Engine Options
// ============================================================================

/// Main options for the session engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Silence after which a character is considered disconnected
    pub heartbeat_timeout: Duration,
    /// How long a hosted session is kept before forced cleanup
    pub grace_period: Duration,
    /// Planner attempts per call (immediate retry, no backoff)
    pub planner_attempts: u32,
    /// Request timeout for store and lookup calls
    pub store_timeout: Duration,
    /// Sleep between reply-queue polls when idle
    pub reply_poll_interval: Duration,
    /// Period of conversation reconciliation
    pub reconcile_interval: Duration,
    /// Sleep between starter-loop checks while waiting
    pub starter_poll_interval: Duration,
    /// Upper bound on planned conversation starts per day
    pub max_daily_conversations: usize,
    /// Entries kept per decision-log sequence
    pub decision_log_capacity: usize,
    /// First game hour at which conversations may start
    pub day_start_hour: u32,
    /// Game hour after which no conversation starts
    pub day_end_hour: u32,
    /// Transport listen address
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM)
    pub tls_cert: Option<PathBuf>,
    /// TLS private key (PEM)
    pub tls_key: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            planner_attempts: DEFAULT_PLANNER_ATTEMPTS,
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
            reply_poll_interval: Duration::from_secs(DEFAULT_REPLY_POLL_SECS),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_SECS),
            starter_poll_interval: Duration::from_secs(DEFAULT_STARTER_POLL_SECS),
            max_daily_conversations: DEFAULT_MAX_DAILY_CONVERSATIONS,
            decision_log_capacity: DEFAULT_DECISION_LOG_CAPACITY,
            day_start_hour: DEFAULT_DAY_START_HOUR,
            day_end_hour: DEFAULT_DAY_END_HOUR,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_BIND_PORT)),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl EngineOptions {
    /// Create a new builder for `EngineOptions`
    #[must_use]
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::default()
    }

    /// Interval of the heartbeat scanner (half the timeout)
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        (self.heartbeat_timeout / 2).max(Duration::from_millis(1))
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    /// Returns `SessionError::InvalidConfig` describing the first violation
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout.is_zero() {
            return Err(SessionError::invalid_config("heartbeat timeout must be > 0"));
        }
        for (name, interval) in [
            ("store timeout", self.store_timeout),
            ("reply poll interval", self.reply_poll_interval),
            ("reconcile interval", self.reconcile_interval),
            ("starter poll interval", self.starter_poll_interval),
        ] {
            if interval.is_zero() {
                return Err(SessionError::invalid_config(format!("{name} must be > 0")));
            }
        }
        if self.planner_attempts == 0 {
            return Err(SessionError::invalid_config("planner attempts must be >= 1"));
        }
        if self.decision_log_capacity == 0 {
            return Err(SessionError::invalid_config(
                "decision log capacity must be >= 1",
            ));
        }
        if self.day_start_hour >= self.day_end_hour || self.day_end_hour > 24 {
            return Err(SessionError::invalid_config(format!(
                "day window {}..{} is empty or out of range",
                self.day_start_hour, self.day_end_hour
            )));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(SessionError::invalid_config(
                "TLS needs both a certificate and a key",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Builder for EngineOptions
// ============================================================================

/// Builder for `EngineOptions`
#[derive(Debug, Default)]
pub struct EngineOptionsBuilder {
    options: EngineOptions,
}

impl EngineOptionsBuilder {
    /// Set heartbeat timeout
    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.options.heartbeat_timeout = timeout;
        self
    }

    /// Set grace period for hosted sessions
    #[must_use]
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.options.grace_period = period;
        self
    }

    /// Set planner attempts per call
    ///
    /// # Panics
    /// Panics if attempts is zero
    #[must_use]
    pub fn planner_attempts(mut self, attempts: u32) -> Self {
        assert!(attempts >= 1, "planner_attempts must be at least 1");
        self.options.planner_attempts = attempts;
        self
    }

    /// Set store request timeout
    #[must_use]
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.options.store_timeout = timeout;
        self
    }

    /// Set reply worker poll interval
    #[must_use]
    pub fn reply_poll_interval(mut self, interval: Duration) -> Self {
        self.options.reply_poll_interval = interval;
        self
    }

    /// Set reconciliation period
    #[must_use]
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.options.reconcile_interval = interval;
        self
    }

    /// Set starter loop poll interval
    #[must_use]
    pub fn starter_poll_interval(mut self, interval: Duration) -> Self {
        self.options.starter_poll_interval = interval;
        self
    }

    /// Set max planned conversations per day
    #[must_use]
    pub fn max_daily_conversations(mut self, max: usize) -> Self {
        self.options.max_daily_conversations = max;
        self
    }

    /// Set decision log capacity
    #[must_use]
    pub fn decision_log_capacity(mut self, capacity: usize) -> Self {
        self.options.decision_log_capacity = capacity.max(1);
        self
    }

    /// Set the game-hour window for conversation starts
    #[must_use]
    pub fn day_window(mut self, start_hour: u32, end_hour: u32) -> Self {
        self.options.day_start_hour = start_hour;
        self.options.day_end_hour = end_hour;
        self
    }

    /// Set transport listen address
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.options.bind_addr = addr;
        self
    }

    /// Set TLS certificate and key paths
    #[must_use]
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.options.tls_cert = Some(cert.into());
        self.options.tls_key = Some(key.into());
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> EngineOptions {
        self.options
    }
}
