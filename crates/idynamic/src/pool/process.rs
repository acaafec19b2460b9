use std::time::{Duration, SystemTime};

use futures::future::join_all;
use thiserror::Error;

use crate::Set;
use crate::pool::config::{DesiredCapacity, ShutdownPolicy};
use crate::pool::gateway::{ExternalJobStatus, GatewayError, JobSpec, SchedulerGateway};
use crate::pool::ledger::{
    JobId, JobLedger, JobRecord, JobState, LedgerError, StateCounts, TerminationReason,
};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What has happened during a single tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Records that were terminated and removed from the ledger, with their final state.
    pub evicted: Vec<JobRecord>,
    pub deficit: u32,
    pub admission_window: u32,
    pub submitted: Vec<JobId>,
    pub failed_submissions: u32,
    /// Ledger counts after the tick has finished.
    pub counts: StateCounts,
}

/// Permits the controller to submit a given number of jobs, based on the desired capacity and
/// the current state of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionPermit {
    /// How many engines are missing, counting everything that is in flight.
    pub deficit: u32,
    /// How many more jobs may enter the scheduler queue.
    pub admission_window: u32,
    pub to_submit: u32,
}

pub fn compute_submission_permit(
    capacity: DesiredCapacity,
    counts: &StateCounts,
) -> SubmissionPermit {
    let deficit = capacity.target_running().saturating_sub(counts.in_flight());
    // Jobs over the cap that were queued by someone else are tolerated, but no new ones are added
    let admission_window = capacity.max_queued().saturating_sub(counts.waiting());
    SubmissionPermit {
        deficit,
        admission_window,
        to_submit: deficit.min(admission_window),
    }
}

/// Keeps the number of running engines at the desired capacity.
///
/// Every [`tick`](CapacityController::tick) refreshes the ledger from the scheduler, evicts
/// terminated jobs and submits new jobs to cover the deficit, without exceeding the queue cap.
/// Ticks must not overlap, which is ensured by taking `&mut self`.
pub struct CapacityController {
    capacity: DesiredCapacity,
    ledger: JobLedger,
    gateway: Box<dyn SchedulerGateway>,
    job_spec: JobSpec,
    gateway_timeout: Duration,
    /// Set once the scheduler has answered a state query.
    scheduler_reached: bool,
    /// Jobs whose state could not be interpreted, reported only once.
    unreadable: Set<JobId>,
}

impl CapacityController {
    pub fn new(
        capacity: DesiredCapacity,
        gateway: Box<dyn SchedulerGateway>,
        job_spec: JobSpec,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            capacity,
            ledger: JobLedger::new(),
            gateway,
            job_spec,
            gateway_timeout,
            scheduler_reached: false,
            unreadable: Set::new(),
        }
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Performs one refresh-decide-act cycle.
    pub async fn tick(&mut self) -> Result<TickReport, TickError> {
        self.refresh().await?;
        let evicted = self.evict_terminated()?;

        let counts = self.ledger.snapshot().counts;
        let permit = compute_submission_permit(self.capacity, &counts);
        self.log_status(&counts, &permit);

        let (submitted, failed_submissions) = self.submit_jobs(permit.to_submit).await?;

        Ok(TickReport {
            evicted,
            deficit: permit.deficit,
            admission_window: permit.admission_window,
            submitted,
            failed_submissions,
            counts: self.ledger.snapshot().counts,
        })
    }

    /// Synchronizes the state of all in-flight jobs with the scheduler.
    async fn refresh(&mut self) -> Result<(), TickError> {
        let job_ids = self.ledger.active_ids();
        log::debug!("Refreshing state of {} job(s)", job_ids.len());

        let query = self.gateway.query_states(&job_ids);
        let mut status_map = match tokio::time::timeout(self.gateway_timeout, query).await {
            Ok(result) => result?,
            Err(_) if !self.scheduler_reached => {
                // Without a single answer there is no known state to keep
                return Err(GatewayError::Timeout(self.gateway_timeout).into());
            }
            Err(_) => {
                log::warn!(
                    "Job state query did not finish in {}, keeping the last known state of {} job(s)",
                    humantime::format_duration(self.gateway_timeout),
                    job_ids.len()
                );
                return Ok(());
            }
        };

        self.scheduler_reached = true;

        let observed_at = SystemTime::now();
        for job_id in job_ids {
            // The scheduler does not know the job, assume that it has finished or was removed
            let status = status_map
                .remove(&job_id)
                .unwrap_or(Ok(ExternalJobStatus::Unknown));
            match status {
                Ok(status) => {
                    self.unreadable.remove(&job_id);
                    self.ledger.update_state(&job_id, status.into(), observed_at)?;
                }
                Err(error) => {
                    if self.unreadable.insert(job_id.clone()) {
                        log::error!(
                            "Could not get state of job {job_id}, keeping it as is: {error:?}"
                        );
                    } else {
                        log::debug!("State of job {job_id} is still unreadable: {error:?}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes terminated jobs from the ledger, so that they are no longer counted.
    fn evict_terminated(&mut self) -> Result<Vec<JobRecord>, LedgerError> {
        let mut job_ids: Vec<JobId> = self
            .ledger
            .terminated()
            .map(|record| record.job_id.clone())
            .collect();
        job_ids.sort();

        let mut evicted = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            self.unreadable.remove(&job_id);
            evicted.push(self.ledger.evict(&job_id)?);
        }
        log_evicted(&evicted);
        Ok(evicted)
    }

    /// Submits `count` jobs concurrently. Each submission is independent, a failure does not
    /// prevent the other jobs from being submitted and recorded.
    async fn submit_jobs(&mut self, count: u32) -> Result<(Vec<JobId>, u32), LedgerError> {
        if count == 0 {
            return Ok((vec![], 0));
        }

        let timeout = self.gateway_timeout;
        let futures = (0..count).map(|_| {
            let submission = self.gateway.submit(&self.job_spec);
            async move {
                tokio::time::timeout(timeout, submission)
                    .await
                    .unwrap_or(Err(GatewayError::Timeout(timeout)))
            }
        });
        let results = join_all(futures).await;

        let submitted_at = SystemTime::now();
        let mut submitted = Vec::with_capacity(results.len());
        let mut failed = 0;
        let mut ledger_error = None;
        for (index, result) in results.into_iter().enumerate() {
            let index = index + 1;
            match result {
                Ok(job_id) => {
                    log::info!("    [+] {index:3} / {count:3} : Submitted job {job_id}");
                    match self.ledger.record(job_id.clone(), submitted_at) {
                        Ok(()) => submitted.push(job_id),
                        Err(error) => {
                            log::error!("Cannot record submitted job {job_id}: {error}");
                            ledger_error.get_or_insert(error);
                        }
                    }
                }
                Err(error) => {
                    if matches!(error, GatewayError::Timeout(_)) {
                        log::warn!(
                            "Submission {index} timed out, the job might still appear in the queue without being tracked"
                        );
                    }
                    log::error!("    [-] {index:3} / {count:3} : Submission failed: {error}");
                    failed += 1;
                }
            }
        }

        match ledger_error {
            Some(error) => Err(error),
            None => Ok((submitted, failed)),
        }
    }

    fn log_status(&self, counts: &StateCounts, permit: &SubmissionPermit) {
        let status = format!(
            "Status: {} (running) + {} (queued) + {} (pending) / {} (wanted)",
            counts.running,
            counts.queued,
            counts.pending,
            self.capacity.target_running()
        );
        if permit.to_submit > 0 {
            log::info!("{status} -> SUBMIT {}", permit.to_submit);
        } else if permit.deficit > 0 {
            log::debug!(
                "{status} -> WAIT (queued {} / {})",
                counts.waiting(),
                self.capacity.max_queued()
            );
        } else {
            log::trace!("{status}");
        }
    }

    /// Stops the controller according to the shutdown `policy`.
    ///
    /// With [`ShutdownPolicy::CancelJobs`], every job that is still in flight is cancelled.
    pub async fn shutdown(&mut self, policy: ShutdownPolicy) {
        let job_ids = self.ledger.active_ids();
        if job_ids.is_empty() {
            log::info!("No jobs in flight, exiting");
            return;
        }
        if policy == ShutdownPolicy::KeepJobs {
            log::info!("Leaving jobs in the scheduler: {}", job_ids.join(" "));
            return;
        }

        log::info!("Cancelling jobs: {}", job_ids.join(" "));
        let timeout = self.gateway_timeout;
        let futures = job_ids.iter().map(|job_id| {
            let cancel = self.gateway.cancel(job_id);
            async move {
                let result = tokio::time::timeout(timeout, cancel)
                    .await
                    .unwrap_or(Err(GatewayError::Timeout(timeout)));
                (result, job_id)
            }
        });

        let now = SystemTime::now();
        for (result, job_id) in join_all(futures).await {
            match result {
                Ok(()) => {
                    log::info!("Job {job_id} was cancelled");
                    let cancelled = JobState::Terminated(TerminationReason::Cancelled);
                    if let Err(error) = self
                        .ledger
                        .update_state(job_id, cancelled, now)
                        .and_then(|_| self.ledger.evict(job_id).map(|_| ()))
                    {
                        log::error!("Cannot remove cancelled job {job_id}: {error}");
                    }
                }
                Err(error) => log::error!("Failed to cancel job {job_id}: {error}"),
            }
        }
    }
}

fn log_evicted(records: &[JobRecord]) {
    for reason in [
        TerminationReason::Finished,
        TerminationReason::Failed,
        TerminationReason::Disappeared,
        TerminationReason::Cancelled,
    ] {
        let ids: Vec<&str> = records
            .iter()
            .filter(|record| record.state == JobState::Terminated(reason))
            .map(|record| record.job_id.as_str())
            .collect();
        if ids.is_empty() {
            continue;
        }
        let ids = ids.join(" ");
        match reason {
            TerminationReason::Finished => log::info!("Completed jobs: {ids}"),
            TerminationReason::Failed => log::warn!("Failed jobs: {ids}"),
            TerminationReason::Disappeared => log::warn!("Missing jobs: {ids}"),
            TerminationReason::Cancelled => log::info!("Cancelled jobs: {ids}"),
        }
    }
}
