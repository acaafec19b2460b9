use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::common::manager::common::format_duration;
use crate::common::utils::time::parse_hms_or_human_time;
use crate::pool::gateway::JobSpec;

/// Command that starts the engines inside an allocation.
const DEFAULT_ENGINE_COMMAND: &str = "mpiexec -n $SLURM_JOB_CPUS_PER_NODE ipengine";

/// Which engine profile should the started engines use.
#[derive(Debug, Clone, Default)]
pub struct EngineProfile {
    pub profile: Option<String>,
    pub profile_dir: Option<PathBuf>,
}

/// Description of the batch script submitted for every engine job.
///
/// Empty strings and zero values leave the corresponding `#SBATCH` directive out, so that the
/// cluster default applies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobTemplate {
    pub partition: String,
    pub qos: String,
    #[serde(deserialize_with = "deserialize_time_limit")]
    pub time_limit: Duration,
    pub memory_mb: u32,
    pub memory_per_cpu_mb: u32,
    pub tasks: u32,
    pub cpus_per_task: u32,
    pub name: String,
    pub output: String,
    /// Use AUKS to forward Kerberos credentials into the job.
    pub auks: bool,
    /// Additional `#SBATCH` arguments, one directive per item.
    pub additional_args: Vec<String>,
    pub engine_command: String,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            partition: "short".to_string(),
            qos: "short".to_string(),
            time_limit: Duration::from_secs(4 * 60 * 60),
            memory_mb: 17000,
            memory_per_cpu_mb: 17000,
            tasks: 1,
            cpus_per_task: 1,
            name: "dynamic".to_string(),
            output: "dynamic.engine-%J.out".to_string(),
            auks: true,
            additional_args: vec![],
            engine_command: DEFAULT_ENGINE_COMMAND.to_string(),
        }
    }
}

fn deserialize_time_limit<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_hms_or_human_time(&value).map_err(serde::de::Error::custom)
}

impl JobTemplate {
    pub fn parse(content: &str) -> crate::Result<Self> {
        let template: JobTemplate = toml::from_str(content)?;
        Ok(template)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Renders the Slurm batch script that starts engines with the given profile.
    pub fn render(&self, profile: &EngineProfile) -> JobSpec {
        let mut script = "#!/usr/bin/env bash\n".to_string();

        let mut directive = |name: &str, value: String| {
            if !value.is_empty() {
                script.push_str(&format!("#SBATCH --{name}={value}\n"));
            }
        };
        directive("partition", self.partition.clone());
        directive("qos", self.qos.clone());
        if !self.time_limit.is_zero() {
            directive("time", format_duration(&self.time_limit));
        }
        directive("mem", non_zero(self.memory_mb));
        directive("mem-per-cpu", non_zero(self.memory_per_cpu_mb));
        directive("ntasks", non_zero(self.tasks));
        directive("cpus-per-task", non_zero(self.cpus_per_task));
        directive("job-name", self.name.clone());
        directive("output", self.output.clone());
        if self.auks {
            directive("auks", "yes".to_string());
        }
        for arg in &self.additional_args {
            script.push_str(&format!("#SBATCH {arg}\n"));
        }

        script.push_str(
            r#"
hostname=`uname -n`

echo "I AM: $hostname"
echo ""
echo "NODE LIST: $SLURM_JOB_NODELIST"
echo "AVAILABLE CORES: $SLURM_JOB_CPUS_PER_NODE"
"#,
        );
        script.push_str(&self.engine_command(profile));
        script.push('\n');

        JobSpec::new(script)
    }

    /// Command line that starts engines, including the profile arguments.
    pub fn engine_command(&self, profile: &EngineProfile) -> String {
        let mut command = self.engine_command.clone();
        if let Some(name) = &profile.profile {
            command.push_str(&format!(" --profile={}", shell_quote(name)));
        }
        if let Some(dir) = &profile.profile_dir {
            command.push_str(&format!(
                " --profile-dir={}",
                shell_quote(&dir.display().to_string())
            ));
        }
        command
    }
}

fn non_zero(value: u32) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./~+:=@%,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'\''"#))
    }
}
