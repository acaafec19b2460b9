use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use thiserror::Error;

use crate::Map;

/// Identifier assigned to a job by the scheduler.
pub type JobId = String;

/// Why has a job stopped being in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    Finished,
    Failed,
    Cancelled,
    /// The scheduler does not know the job anymore.
    Disappeared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Submitted, the scheduler has not confirmed it yet.
    Pending,
    Queued,
    Running,
    Terminated(TerminationReason),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Terminated(_))
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Terminated(TerminationReason::Finished) => "finished",
            JobState::Terminated(TerminationReason::Failed) => "failed",
            JobState::Terminated(TerminationReason::Cancelled) => "cancelled",
            JobState::Terminated(TerminationReason::Disappeared) => "missing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub submitted_at: SystemTime,
    pub state: JobState,
    /// When was the state last confirmed by the scheduler.
    pub last_observed_at: Option<SystemTime>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Job {0} is already recorded")]
    DuplicateJob(JobId),
    #[error("Job {0} is not recorded")]
    UnknownJob(JobId),
    #[error("Job {0} cannot be evicted, it is still {1}")]
    NotTerminal(JobId, JobState),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: u32,
    pub queued: u32,
    pub running: u32,
    pub terminated: u32,
}

impl StateCounts {
    /// Jobs that occupy (or will occupy) an engine slot.
    pub fn in_flight(&self) -> u32 {
        self.running + self.queued + self.pending
    }

    /// Jobs that occupy a slot in the scheduler queue.
    /// Pending jobs are counted as queued until the scheduler says otherwise.
    pub fn waiting(&self) -> u32 {
        self.queued + self.pending
    }

    fn add(&mut self, state: JobState) {
        match state {
            JobState::Pending => self.pending += 1,
            JobState::Queued => self.queued += 1,
            JobState::Running => self.running += 1,
            JobState::Terminated(_) => self.terminated += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub counts: StateCounts,
    /// Non-terminal records, oldest submission first.
    pub active: Vec<JobRecord>,
}

/// In-memory bookkeeping of all jobs submitted by this process.
///
/// The ledger only tracks records, capacity decisions are made by
/// [`CapacityController`](super::process::CapacityController).
#[derive(Default)]
pub struct JobLedger {
    jobs: Map<JobId, JobRecord>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, job_id: JobId, submitted_at: SystemTime) -> Result<(), LedgerError> {
        if self.jobs.contains_key(&job_id) {
            return Err(LedgerError::DuplicateJob(job_id));
        }
        let record = JobRecord {
            job_id: job_id.clone(),
            submitted_at,
            state: JobState::Pending,
            last_observed_at: None,
        };
        self.jobs.insert(job_id, record);
        Ok(())
    }

    pub fn update_state(
        &mut self,
        job_id: &str,
        new_state: JobState,
        observed_at: SystemTime,
    ) -> Result<(), LedgerError> {
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| LedgerError::UnknownJob(job_id.to_string()))?;
        record.last_observed_at = Some(observed_at);

        if record.state == new_state {
            return Ok(());
        }
        if record.state.is_terminal() {
            log::warn!(
                "Job {job_id} is already {}, ignoring transition to {new_state}",
                record.state
            );
            return Ok(());
        }

        log::debug!("Job {job_id}: {} -> {new_state}", record.state);
        record.state = new_state;
        Ok(())
    }

    pub fn evict(&mut self, job_id: &str) -> Result<JobRecord, LedgerError> {
        match self.jobs.get(job_id) {
            None => Err(LedgerError::UnknownJob(job_id.to_string())),
            Some(record) if !record.state.is_terminal() => Err(LedgerError::NotTerminal(
                job_id.to_string(),
                record.state,
            )),
            Some(_) => self
                .jobs
                .remove(job_id)
                .ok_or_else(|| LedgerError::UnknownJob(job_id.to_string())),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut counts = StateCounts::default();
        let mut active = Vec::with_capacity(self.jobs.len());
        for record in self.jobs.values() {
            counts.add(record.state);
            if !record.state.is_terminal() {
                active.push(record.clone());
            }
        }
        active.sort_by(by_submission);
        LedgerSnapshot { counts, active }
    }

    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    /// Ids of non-terminal jobs, oldest submission first.
    pub fn active_ids(&self) -> Vec<JobId> {
        let mut records: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|record| !record.state.is_terminal())
            .collect();
        records.sort_by(|a, b| by_submission(a, b));
        records.into_iter().map(|r| r.job_id.clone()).collect()
    }

    pub fn terminated(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values().filter(|record| record.state.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn by_submission(a: &JobRecord, b: &JobRecord) -> Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.job_id.cmp(&b.job_id))
}
