//! Runtime configuration for a resharing run

use std::time::Duration;

use crate::error::{ReshareError, Result};

/// Capacity of the shared outbound stream unless configured otherwise.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 10;

/// Overall deadline for a run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for generating one party's pre-parameters.
pub const DEFAULT_PRE_PARAMS_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted deadline (thirty years). Anything longer cannot be
/// added to the clock on every platform.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// What the orchestrator does when a message cannot be delivered.
///
/// Deliveries are never retried under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Record the failure and keep going; the run deadline bounds the damage.
    #[default]
    BestEffort,
    /// Fail the run on the first undeliverable message.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Bound on envelopes buffered between the adapters and the router
    pub outbound_capacity: usize,
    pub run_timeout: Duration,
    pub pre_params_timeout: Duration,
    pub delivery_policy: DeliveryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            pre_params_timeout: DEFAULT_PRE_PARAMS_TIMEOUT,
            delivery_policy: DeliveryPolicy::BestEffort,
        }
    }
}

impl RunConfig {
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_delivery_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }
}

pub fn validate_config(config: &RunConfig) -> Result<()> {
    if config.outbound_capacity == 0 {
        return Err(ReshareError::Config(
            "outbound capacity must be at least 1".to_string(),
        ));
    }
    if config.run_timeout.is_zero() {
        return Err(ReshareError::Config(
            "run timeout must be non-zero".to_string(),
        ));
    }
    if config.pre_params_timeout.is_zero() {
        return Err(ReshareError::Config(
            "pre-params timeout must be non-zero".to_string(),
        ));
    }
    if config.run_timeout > MAX_TIMEOUT || config.pre_params_timeout > MAX_TIMEOUT {
        return Err(ReshareError::Config(format!(
            "timeouts must not exceed {}s",
            MAX_TIMEOUT.as_secs()
        )));
    }
    Ok(())
}
