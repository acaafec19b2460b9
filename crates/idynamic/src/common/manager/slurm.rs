use crate::Map;

/// Separator between columns requested from `squeue` by [`SQUEUE_FORMAT`].
pub const SQUEUE_SEPARATOR: char = '|';
/// `squeue --format` value that prints `<job-id>|<state>` lines.
pub const SQUEUE_FORMAT: &str = "%i|%T";

/// Finds the job id in the output of `sbatch`.
///
/// The regular output is `Submitted batch job <id>`. Some sites wrap `sbatch` and print a
/// different message, in that case the last token of the first line is used.
pub fn parse_sbatch_job_id(output: &str) -> anyhow::Result<String> {
    let id = output
        .lines()
        .map(|l| l.trim())
        .find(|l| l.to_lowercase().starts_with("submitted batch job"))
        .and_then(|l| l.split_whitespace().nth(3))
        .or_else(|| {
            output
                .lines()
                .next()
                .and_then(|l| l.split_whitespace().last())
        })
        .ok_or_else(|| anyhow::anyhow!("Missing job id in sbatch output\n{output}"))?;

    // Federated clusters append `;<cluster>` to the id
    let id = id.split(';').next().unwrap_or(id);
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        anyhow::bail!("Invalid job id `{id}` in sbatch output\n{output}");
    }
    Ok(id.to_string())
}

/// Parse `<job-id>|<state>` lines produced by `squeue --format=%i|%T`.
pub fn get_squeue_items(output: &str) -> Map<&str, &str> {
    let mut map = Map::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((id, state)) = line.split_once(SQUEUE_SEPARATOR) {
            map.insert(id.trim(), state.trim());
        } else {
            log::debug!("Ignoring malformed squeue line `{line}`");
        }
    }
    map
}
