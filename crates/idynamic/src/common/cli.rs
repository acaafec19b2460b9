use std::path::PathBuf;

use clap::Parser;

use crate::common::error::IdynError;
use crate::common::utils::time::ArgDuration;
use crate::pool::config::{
    DEFAULT_MAX_QUEUED, DEFAULT_TARGET_RUNNING, DesiredCapacity, ShutdownPolicy,
};
use crate::pool::{ControllerConfig, EngineProfile, JobTemplate};

// Root CLI options
#[derive(Parser)]
#[command(author, about, version(crate::IDYNAMIC_VERSION), help_expected(true))]
pub struct RootOptions {
    /// Profile used by the started engines
    #[arg(long, env = "IDYNAMIC_PROFILE")]
    pub profile: Option<String>,

    /// Profile directory used by the started engines
    #[arg(long, value_hint = clap::ValueHint::DirPath, env = "IDYNAMIC_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,

    /// How many engines should be running
    #[arg(long = "n", default_value_t = DEFAULT_TARGET_RUNNING, env = "IDYNAMIC_N")]
    pub target_running: u32,

    /// How many engine jobs may wait in the scheduler queue at once
    #[arg(long = "q", default_value_t = DEFAULT_MAX_QUEUED, env = "IDYNAMIC_Q")]
    pub max_queued: u32,

    /// How often is the scheduler checked
    #[arg(long, default_value = "30s", env = "IDYNAMIC_INTERVAL")]
    pub interval: ArgDuration,

    /// Maximum duration of a single scheduler command
    #[arg(long, default_value = "60s", env = "IDYNAMIC_GATEWAY_TIMEOUT")]
    pub gateway_timeout: ArgDuration,

    /// Directory where job scripts are created and scheduler commands are executed
    #[arg(long, value_hint = clap::ValueHint::DirPath, env = "IDYNAMIC_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// TOML file that overrides the defaults of the submitted job script
    #[arg(long, value_hint = clap::ValueHint::FilePath, env = "IDYNAMIC_TEMPLATE")]
    pub template: Option<PathBuf>,

    /// Do not cancel the submitted jobs when the controller stops
    #[arg(long, env = "IDYNAMIC_KEEP_JOBS")]
    pub keep_jobs: bool,

    /// Enables more detailed log output (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl RootOptions {
    pub fn controller_config(&self) -> crate::Result<ControllerConfig> {
        let shutdown = if self.keep_jobs {
            ShutdownPolicy::KeepJobs
        } else {
            ShutdownPolicy::CancelJobs
        };
        ControllerConfig::new(
            DesiredCapacity::new(self.target_running, self.max_queued),
            *self.interval.get(),
            *self.gateway_timeout.get(),
            shutdown,
        )
    }

    pub fn engine_profile(&self) -> EngineProfile {
        EngineProfile {
            profile: self.profile.clone(),
            profile_dir: self.profile_dir.clone(),
        }
    }

    pub fn job_template(&self) -> crate::Result<JobTemplate> {
        match &self.template {
            Some(path) => JobTemplate::load(path).map_err(|error| {
                IdynError::ConfigurationError(format!(
                    "Cannot load job template from {}: {error}",
                    path.display()
                ))
            }),
            None => Ok(JobTemplate::default()),
        }
    }

    /// Returns the working directory, falling back to the current directory.
    pub fn work_dir(&self) -> crate::Result<PathBuf> {
        let directory = match &self.work_dir {
            Some(directory) => directory.clone(),
            None => std::env::current_dir()?,
        };
        if !directory.is_dir() {
            return Err(IdynError::ConfigurationError(format!(
                "Work directory {} does not exist",
                directory.display()
            )));
        }
        Ok(directory)
    }
}
