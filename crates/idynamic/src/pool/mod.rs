//! This module keeps a pool of engines alive on a batch scheduler.
//!
//! The controller periodically asks the scheduler about jobs that it has submitted, forgets the
//! jobs that have ended and submits new ones until the desired number of engines is running or
//! waiting in the queue. The number of jobs waiting in the scheduler queue is capped.
pub mod config;
pub mod driver;
pub mod gateway;
pub mod ledger;
pub mod process;
pub mod template;

pub use config::{ControllerConfig, DesiredCapacity, ShutdownPolicy};
pub use driver::run_control_loop;
pub use gateway::{ExternalJobStatus, GatewayError, JobSpec, SchedulerGateway};
pub use ledger::{JobId, JobLedger, JobRecord, JobState, TerminationReason};
pub use process::{CapacityController, TickError, TickReport};
pub use template::{EngineProfile, JobTemplate};
