mod common;
pub mod slurm;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::Map;
use crate::pool::ledger::{JobId, JobState, TerminationReason};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The scheduler could not be reached at all.
    #[error("Scheduler is unavailable: {0}")]
    Unavailable(String),
    #[error("Job submission failed: {0}")]
    Submit(String),
    #[error("Cancellation of job {0} failed: {1}")]
    Cancel(JobId, String),
    #[error("Scheduler did not respond in {0:?}")]
    Timeout(Duration),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// State of a job as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalJobStatus {
    Queued,
    Running,
    Finished,
    Failed,
    /// The scheduler does not know the job (anymore).
    Unknown,
}

impl From<ExternalJobStatus> for JobState {
    fn from(status: ExternalJobStatus) -> Self {
        match status {
            ExternalJobStatus::Queued => JobState::Queued,
            ExternalJobStatus::Running => JobState::Running,
            ExternalJobStatus::Finished => JobState::Terminated(TerminationReason::Finished),
            ExternalJobStatus::Failed => JobState::Terminated(TerminationReason::Failed),
            ExternalJobStatus::Unknown => JobState::Terminated(TerminationReason::Disappeared),
        }
    }
}

/// Result of a batched state query.
/// A missing id is equivalent to [`ExternalJobStatus::Unknown`], an error means that the state
/// of that single job could not be interpreted.
pub type JobStatusMap = Map<JobId, anyhow::Result<ExternalJobStatus>>;

/// Opaque payload handed to the scheduler on submission (e.g. a batch script).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec(Bytes);

impl JobSpec {
    pub fn new<T: Into<Bytes>>(content: T) -> Self {
        Self(content.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>>>>;

/// Handler that can communicate with a batch scheduler (e.g. Slurm).
///
/// The returned futures do not borrow the gateway, so several calls may be in flight at once.
pub trait SchedulerGateway {
    /// Submit a single job, returning the id assigned by the scheduler.
    fn submit(&self, spec: &JobSpec) -> GatewayFuture<JobId>;

    /// Get states of a set of jobs.
    /// This function takes multiple jobs at once to amortize the query cost.
    fn query_states(&self, job_ids: &[JobId]) -> GatewayFuture<JobStatusMap>;

    /// Cancel a job, if it still exists.
    fn cancel(&self, job_id: &JobId) -> GatewayFuture<()>;
}

#[cfg(test)]
mod tests {
    use super::ExternalJobStatus;
    use crate::pool::ledger::{JobState, TerminationReason};

    #[test]
    fn external_status_to_state() {
        assert_eq!(JobState::from(ExternalJobStatus::Queued), JobState::Queued);
        assert_eq!(JobState::from(ExternalJobStatus::Running), JobState::Running);
        assert_eq!(
            JobState::from(ExternalJobStatus::Failed),
            JobState::Terminated(TerminationReason::Failed)
        );
        assert_eq!(
            JobState::from(ExternalJobStatus::Unknown),
            JobState::Terminated(TerminationReason::Disappeared)
        );
    }
}
