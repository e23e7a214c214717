//! Timing profile -- default budgets for requests, peers and refresh.
//!
//! Client and pool settings start from `DEFAULT_TIMING` and may be overridden
//! per client (config file, setters) or per request.

use std::time::Duration;

/// A named set of timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    // -- Request retry --
    /// Backoff before the second attempt; doubles per attempt.
    pub request_min_backoff_ms: u64,
    /// Ceiling for the per-attempt backoff.
    pub request_max_backoff_ms: u64,
    /// Attempts per request before giving up.
    pub max_attempts: u32,
    /// Per-call transport deadline.
    pub grpc_deadline_ms: u64,
    /// Wall-clock budget for one request across all attempts.
    pub request_timeout_ms: u64,

    // -- Peer health --
    pub node_min_backoff_ms: u64,
    pub node_max_backoff_ms: u64,
    /// Lower bound between readmission passes.
    pub min_readmit_ms: u64,
    /// Upper bound between readmission passes.
    pub max_readmit_ms: u64,

    // -- Membership --
    /// Period of the background address book refresh.
    pub network_update_period_secs: u64,

    // -- Transport --
    pub dial_timeout_ms: u64,
    /// QUIC idle timeout.
    pub quic_idle_timeout_secs: u64,
    pub quic_keepalive_secs: u64,
}

impl TimingProfile {
    pub const fn request_min_backoff(&self) -> Duration {
        Duration::from_millis(self.request_min_backoff_ms)
    }

    pub const fn request_max_backoff(&self) -> Duration {
        Duration::from_millis(self.request_max_backoff_ms)
    }

    pub const fn grpc_deadline(&self) -> Duration {
        Duration::from_millis(self.grpc_deadline_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn node_min_backoff(&self) -> Duration {
        Duration::from_millis(self.node_min_backoff_ms)
    }

    pub const fn node_max_backoff(&self) -> Duration {
        Duration::from_millis(self.node_max_backoff_ms)
    }

    pub const fn min_readmit(&self) -> Duration {
        Duration::from_millis(self.min_readmit_ms)
    }

    pub const fn max_readmit(&self) -> Duration {
        Duration::from_millis(self.max_readmit_ms)
    }

    pub const fn network_update_period(&self) -> Duration {
        Duration::from_secs(self.network_update_period_secs)
    }

    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

pub const DEFAULT_TIMING: TimingProfile = TimingProfile {
    // Request retry: 250ms doubling to 8s, 10 attempts
    request_min_backoff_ms: 250,
    request_max_backoff_ms: 8_000,
    max_attempts: 10,
    grpc_deadline_ms: 10_000,
    request_timeout_ms: 2 * 60 * 1000,

    // Peer health: 8s doubling to 1h
    node_min_backoff_ms: 8_000,
    node_max_backoff_ms: 3600 * 1000,
    min_readmit_ms: 8_000,
    max_readmit_ms: 3600 * 1000,

    network_update_period_secs: 24 * 3600,

    dial_timeout_ms: 10_000,
    quic_idle_timeout_secs: 60,
    quic_keepalive_secs: 15,
};
