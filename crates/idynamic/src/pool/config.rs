use std::time::Duration;

use crate::common::error::IdynError;

/// Default number of engines that should be running.
pub const DEFAULT_TARGET_RUNNING: u32 = 10;
/// Default upper bound of jobs waiting in the scheduler queue.
pub const DEFAULT_MAX_QUEUED: u32 = 20;
/// How often is the scheduler polled by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Upper bound for a single scheduler call (submit, query or cancel).
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(60);

/// How many engines should run and how many jobs may wait in the scheduler queue.
/// Set once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredCapacity {
    target_running: u32,
    max_queued: u32,
}

impl DesiredCapacity {
    pub fn new(target_running: u32, max_queued: u32) -> Self {
        Self {
            target_running,
            max_queued,
        }
    }

    pub fn target_running(&self) -> u32 {
        self.target_running
    }

    pub fn max_queued(&self) -> u32 {
        self.max_queued
    }
}

impl Default for DesiredCapacity {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_RUNNING, DEFAULT_MAX_QUEUED)
    }
}

/// What happens with submitted jobs when the controller stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Cancel every job that is still pending, queued or running.
    CancelJobs,
    /// Leave the jobs in the scheduler.
    KeepJobs,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub capacity: DesiredCapacity,
    pub poll_interval: Duration,
    pub gateway_timeout: Duration,
    pub shutdown: ShutdownPolicy,
}

impl ControllerConfig {
    pub fn new(
        capacity: DesiredCapacity,
        poll_interval: Duration,
        gateway_timeout: Duration,
        shutdown: ShutdownPolicy,
    ) -> crate::Result<Self> {
        if poll_interval.is_zero() {
            return Err(IdynError::ConfigurationError(
                "Poll interval has to be larger than zero".to_string(),
            ));
        }
        if gateway_timeout.is_zero() {
            return Err(IdynError::ConfigurationError(
                "Gateway timeout has to be larger than zero".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            poll_interval,
            gateway_timeout,
            shutdown,
        })
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            capacity: DesiredCapacity::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            shutdown: ShutdownPolicy::CancelJobs,
        }
    }
}
