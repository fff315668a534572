//! Transfer retry policy
//!
//! Two independent tiers, each with its own error budget and linear backoff:
//!
//! - **inner** (stream level): a failed chunk read is recovered by reopening
//!   the read stream on the same session at the last written offset.
//! - **outer** (connection level): a copy attempt that aborts entirely is
//!   recovered by tearing the session down and reconnecting.
//!
//! Exhausting either budget fails only the task that owns it.

use std::time::Duration;

use crate::sftp::error::SftpError;

/// Retry configuration for both tiers
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Stream errors tolerated within one copy attempt
    pub max_inner_errors: u32,

    /// Inner backoff unit; the n-th stream error sleeps `n * unit`
    pub inner_backoff_unit: Duration,

    /// Full reconnects after the first attempt
    pub max_outer_retries: u32,

    /// Outer backoff unit; the n-th reconnect sleeps `n * unit`
    pub outer_backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_inner_errors: 5,
            inner_backoff_unit: Duration::from_secs(1),
            max_outer_retries: 3,
            outer_backoff_unit: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_outer_retries: u32, max_inner_errors: u32) -> Self {
        Self {
            max_outer_retries,
            max_inner_errors,
            ..Default::default()
        }
    }

    /// Set custom backoff units
    pub fn with_backoff(mut self, inner: Duration, outer: Duration) -> Self {
        self.inner_backoff_unit = inner;
        self.outer_backoff_unit = outer;
        self
    }

    /// Policy without sleeps, for tests and dry runs
    pub fn immediate(max_outer_retries: u32, max_inner_errors: u32) -> Self {
        Self::new(max_outer_retries, max_inner_errors).with_backoff(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before recovering from the `error_count`-th stream error (1-based)
    pub fn inner_backoff(&self, error_count: u32) -> Duration {
        self.inner_backoff_unit * error_count
    }

    /// Delay before the `attempt`-th reconnect (1-based)
    pub fn outer_backoff(&self, attempt: u32) -> Duration {
        self.outer_backoff_unit * attempt
    }

    /// Total copy attempts the outer tier will make
    pub fn max_attempts(&self) -> u32 {
        self.max_outer_retries + 1
    }

    pub fn inner_budget(&self) -> ErrorBudget {
        ErrorBudget::new(self.max_inner_errors)
    }
}

/// Bounded error counter
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    used: u32,
    max: u32,
}

impl ErrorBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Record one error. Returns the new count, or `None` once over budget.
    pub fn spend(&mut self) -> Option<u32> {
        self.used += 1;
        if self.used > self.max {
            None
        } else {
            Some(self.used)
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

/// Check if an error is worth a full reconnect (outer tier)
pub fn is_retryable_error(error: &SftpError) -> bool {
    match error {
        SftpError::ConnectionFailed(_) => true,
        SftpError::Timeout(_) => true,
        SftpError::NotConnected(_) => true,
        SftpError::ProtocolError(_) => true,
        SftpError::SubsystemNotAvailable(_) => true,
        SftpError::StreamError(_) => true,
        SftpError::StreamBudgetExhausted { .. } => true,
        // Credentials, local disk, missing or forbidden files do not heal by reconnecting
        _ => false,
    }
}

/// Check if an error means the session itself is gone
pub fn is_connection_error(error: &SftpError) -> bool {
    matches!(
        error,
        SftpError::ConnectionFailed(_) | SftpError::Timeout(_) | SftpError::NotConnected(_)
    )
}
