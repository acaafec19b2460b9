use std::io::Write;
use std::path::Path;
use std::process::Output;

use anyhow::Context;
use bstr::ByteSlice;
use tokio::process::Command;

use crate::pool::ledger::JobId;

/// Prefix of job scripts written into the working directory.
const SCRIPT_PREFIX: &str = "idynamic-";

/// Writes a job script into `directory` and submits it with `program` (e.g. `sbatch`).
///
/// The script is removed once the submission command finishes, the scheduler keeps its own copy.
pub async fn submit_script<F>(
    script: &[u8],
    program: &str,
    directory: &Path,
    get_job_id: F,
) -> anyhow::Result<JobId>
where
    F: FnOnce(&str) -> anyhow::Result<JobId>,
{
    let mut file = tempfile::Builder::new()
        .prefix(SCRIPT_PREFIX)
        .suffix(".sh")
        .tempfile_in(directory)
        .with_context(|| format!("Cannot create job script in {}", directory.display()))?;
    file.write_all(script)
        .and_then(|_| file.flush())
        .with_context(|| format!("Cannot write job script {}", file.path().display()))?;

    let script_path = file
        .path()
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Job script path {:?} is not valid UTF-8", file.path()))?
        .to_string();

    let output = run_command(program, &[script_path.as_str()], directory).await?;
    get_job_id(output.trim())
}

/// Runs a command in `workdir` and returns its standard output if it has succeeded.
pub async fn run_command(program: &str, args: &[&str], workdir: &Path) -> anyhow::Result<String> {
    log::debug!("Running command `{program} {}`", args.join(" "));

    let mut command = create_command(program, args, workdir);
    let output = command
        .output()
        .await
        .with_context(|| format!("{program} start failed"))?;
    let output =
        check_command_output(output).with_context(|| format!("{program} execution failed"))?;
    let output = output
        .stdout
        .to_str()
        .map_err(|e| anyhow::anyhow!("Invalid UTF-8 {} output: {:?}", program, e))?;
    Ok(output.to_string())
}

fn create_command(program: &str, args: &[&str], workdir: &Path) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    command.current_dir(workdir);
    command.kill_on_drop(true);
    command
}

fn check_command_output(output: Output) -> anyhow::Result<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}
