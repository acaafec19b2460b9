use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use idynamic::common::cli::RootOptions;
use idynamic::common::setup::setup_logging;
use idynamic::pool::gateway::slurm::SlurmGateway;
use idynamic::pool::{CapacityController, run_control_loop};

async fn wait_for_stop_signal() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

async fn run(opts: RootOptions) -> anyhow::Result<()> {
    let config = opts.controller_config()?;
    let template = opts.job_template()?;
    let work_dir = opts.work_dir()?;
    let job_spec = template.render(&opts.engine_profile());

    log::info!(
        "Keeping {} engine(s) running with at most {} job(s) in queue, checking every {}",
        config.capacity.target_running(),
        config.capacity.max_queued(),
        humantime::format_duration(config.poll_interval)
    );
    log::debug!("Work directory: {}", work_dir.display());

    let mut controller = CapacityController::new(
        config.capacity,
        Box::new(SlurmGateway::new(work_dir)),
        job_spec,
        config.gateway_timeout,
    );

    let stop = CancellationToken::new();
    let signals = tokio::spawn({
        let stop = stop.clone();
        async move {
            match wait_for_stop_signal().await {
                Ok(()) => {
                    log::info!("Stop requested, finishing the current tick");
                    stop.cancel();
                }
                Err(error) => log::error!("Cannot listen for stop signals: {error:?}"),
            }
        }
    });

    let result = run_control_loop(&mut controller, config.poll_interval, stop).await;
    signals.abort();
    result?;

    controller.shutdown(config.shutdown).await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = RootOptions::parse();
    setup_logging(opts.verbose);

    if let Err(error) = run(opts).await {
        log::error!("{error:?}");
        std::process::exit(1);
    }
}
