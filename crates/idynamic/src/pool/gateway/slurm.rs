use std::path::PathBuf;

use crate::common::manager::slurm::{SQUEUE_FORMAT, get_squeue_items, parse_sbatch_job_id};
use crate::pool::gateway::common::{run_command, submit_script};
use crate::pool::gateway::{
    ExternalJobStatus, GatewayError, GatewayFuture, JobSpec, JobStatusMap, SchedulerGateway,
};
use crate::pool::ledger::JobId;

/// Talks to Slurm through `sbatch`, `squeue` and `scancel`.
pub struct SlurmGateway {
    work_dir: PathBuf,
}

impl SlurmGateway {
    /// `work_dir` is the directory where job scripts are written and Slurm commands executed.
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

impl SchedulerGateway for SlurmGateway {
    fn submit(&self, spec: &JobSpec) -> GatewayFuture<JobId> {
        let spec = spec.clone();
        let work_dir = self.work_dir.clone();

        Box::pin(async move {
            submit_script(spec.as_bytes(), "sbatch", &work_dir, |output| {
                log::debug!("Sbatch output: {output}");
                parse_sbatch_job_id(output)
            })
            .await
            .map_err(|error| GatewayError::Submit(format!("{error:?}")))
        })
    }

    fn query_states(&self, job_ids: &[JobId]) -> GatewayFuture<JobStatusMap> {
        let job_ids = job_ids.to_vec();
        let work_dir = self.work_dir.clone();

        Box::pin(async move {
            // Always list all jobs of the current user. Asking for specific ids makes squeue
            // fail once one of them is purged from the controller.
            let format = format!("--format={SQUEUE_FORMAT}");
            let arguments = ["--noheader", "--me", "--states=all", format.as_str()];
            let output = run_command("squeue", &arguments, &work_dir)
                .await
                .map_err(|error| GatewayError::Unavailable(format!("{error:?}")))?;
            log::trace!("Squeue output: {output}");

            let items = get_squeue_items(&output);
            let mut result = JobStatusMap::with_capacity(job_ids.len());
            for job_id in job_ids {
                let status = match items.get(job_id.as_str()) {
                    Some(state) => parse_slurm_state(state),
                    None => Ok(ExternalJobStatus::Unknown),
                };
                result.insert(job_id, status);
            }
            Ok(result)
        })
    }

    fn cancel(&self, job_id: &JobId) -> GatewayFuture<()> {
        let job_id = job_id.clone();
        let work_dir = self.work_dir.clone();

        Box::pin(async move {
            run_command("scancel", &[job_id.as_str()], &work_dir)
                .await
                .map_err(|error| GatewayError::Cancel(job_id.clone(), format!("{error:?}")))?;
            Ok(())
        })
    }
}

/// Maps a Slurm job state (as printed by `squeue --format=%T`) to an external status.
pub fn parse_slurm_state(state: &str) -> anyhow::Result<ExternalJobStatus> {
    // Some Slurm versions append a reason, e.g. `CANCELLED by 1000`
    let state = state.split_whitespace().next().unwrap_or(state);
    let status = match state {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED"
        | "RESV_DEL_HOLD" => ExternalJobStatus::Queued,
        "RUNNING" | "RESIZING" | "SUSPENDED" | "STOPPED" | "SIGNALING" | "STAGE_OUT" => {
            ExternalJobStatus::Running
        }
        "COMPLETED" | "COMPLETING" | "TIMEOUT" => ExternalJobStatus::Finished,
        "CANCELLED" | "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE"
        | "PREEMPTED" | "REVOKED" | "SPECIAL_EXIT" => ExternalJobStatus::Failed,
        _ => anyhow::bail!("Unknown Slurm job state {state}"),
    };
    Ok(status)
}
