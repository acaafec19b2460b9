use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use std::time::Duration;

use derive_builder::Builder;
use log::LevelFilter;

use crate::pool::gateway::{
    ExternalJobStatus, GatewayError, GatewayFuture, JobSpec, JobStatusMap, SchedulerGateway,
};
use crate::pool::ledger::JobId;
use crate::pool::{CapacityController, DesiredCapacity};
use crate::{Map, Set};

pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// State of the simulated scheduler.
pub struct SchedulerState {
    /// Jobs known to the scheduler.
    pub jobs: Map<JobId, ExternalJobStatus>,
    /// Status of newly submitted jobs.
    pub initial_status: ExternalJobStatus,
    next_id: u64,
    /// When set, every submission returns this id.
    pub fixed_id: Option<JobId>,
    pub submit_attempts: u32,
    /// Submission attempts (counted from 1) that will fail.
    pub failing_submissions: Set<u32>,
    /// Jobs whose state cannot be interpreted.
    pub unreadable: Set<JobId>,
    pub unavailable: bool,
    pub query_calls: u32,
    pub query_delay: Option<Duration>,
    pub submit_delay: Option<Duration>,
    pub cancelled: Vec<JobId>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            jobs: Default::default(),
            initial_status: ExternalJobStatus::Queued,
            next_id: 1,
            fixed_id: None,
            submit_attempts: 0,
            failing_submissions: Default::default(),
            unreadable: Default::default(),
            unavailable: false,
            query_calls: 0,
            query_delay: None,
            submit_delay: None,
            cancelled: vec![],
        }
    }
}

impl SchedulerState {
    pub fn count(&self, status: ExternalJobStatus) -> usize {
        self.jobs.values().filter(|s| **s == status).count()
    }

    /// Moves all jobs in state `from` into state `to`.
    pub fn transition_all(&mut self, from: ExternalJobStatus, to: ExternalJobStatus) {
        for status in self.jobs.values_mut() {
            if *status == from {
                *status = to;
            }
        }
    }

    pub fn set_status(&mut self, job_id: &str, status: ExternalJobStatus) {
        self.jobs.insert(job_id.to_string(), status);
    }
}

/// Scheduler gateway that simulates a scheduler in memory.
#[derive(Clone, Default)]
pub struct TestGateway {
    state: Rc<RefCell<SchedulerState>>,
}

impl TestGateway {
    pub fn state(&self) -> RefMut<'_, SchedulerState> {
        self.state.borrow_mut()
    }
}

impl SchedulerGateway for TestGateway {
    fn submit(&self, _spec: &JobSpec) -> GatewayFuture<JobId> {
        let (result, delay) = {
            let mut state = self.state.borrow_mut();
            state.submit_attempts += 1;
            let attempt = state.submit_attempts;
            let result = if state.unavailable {
                Err(GatewayError::Submit("scheduler is down".to_string()))
            } else if state.failing_submissions.contains(&attempt) {
                Err(GatewayError::Submit(format!("attempt {attempt} rejected")))
            } else {
                let id = match &state.fixed_id {
                    Some(id) => id.clone(),
                    None => {
                        let id = state.next_id;
                        state.next_id += 1;
                        id.to_string()
                    }
                };
                let status = state.initial_status;
                state.jobs.insert(id.clone(), status);
                Ok(id)
            };
            (result, state.submit_delay)
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn query_states(&self, job_ids: &[JobId]) -> GatewayFuture<JobStatusMap> {
        let (result, delay) = {
            let mut state = self.state.borrow_mut();
            state.query_calls += 1;
            let result = if state.unavailable {
                Err(GatewayError::Unavailable("connection refused".to_string()))
            } else {
                let mut map = JobStatusMap::default();
                for job_id in job_ids {
                    if state.unreadable.contains(job_id) {
                        map.insert(job_id.clone(), Err(anyhow::anyhow!("unreadable state")));
                    } else if let Some(status) = state.jobs.get(job_id) {
                        map.insert(job_id.clone(), Ok(*status));
                    }
                }
                Ok(map)
            };
            (result, state.query_delay)
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn cancel(&self, job_id: &JobId) -> GatewayFuture<()> {
        let result = {
            let mut state = self.state.borrow_mut();
            if state.unavailable {
                Err(GatewayError::Cancel(job_id.clone(), "scheduler is down".to_string()))
            } else {
                state.jobs.remove(job_id);
                state.cancelled.push(job_id.clone());
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct Controller {
    #[builder(default = "10")]
    target_running: u32,
    #[builder(default = "20")]
    max_queued: u32,
    #[builder(default = "TEST_TIMEOUT")]
    gateway_timeout: Duration,
}

impl ControllerBuilder {
    pub fn build(self, gateway: &TestGateway) -> CapacityController {
        let Controller {
            target_running,
            max_queued,
            gateway_timeout,
        } = self.finish().unwrap();
        CapacityController::new(
            DesiredCapacity::new(target_running, max_queued),
            Box::new(gateway.clone()),
            JobSpec::new("#!/bin/bash\nipengine\n"),
            gateway_timeout,
        )
    }
}

pub fn create_controller(
    target_running: u32,
    max_queued: u32,
) -> (CapacityController, TestGateway) {
    let gateway = TestGateway::default();
    let controller = ControllerBuilder::default()
        .target_running(target_running)
        .max_queued(max_queued)
        .build(&gateway);
    (controller, gateway)
}
