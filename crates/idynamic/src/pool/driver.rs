use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::pool::gateway::GatewayError;
use crate::pool::process::{CapacityController, TickError};

/// Runs the controller periodically until `stop` is cancelled.
///
/// Cancellation is only observed between ticks, a tick that has started always finishes its
/// submissions. The only error that stops the loop is a scheduler that is unreachable or does
/// not answer during the first tick; later failures are logged and retried in the next tick.
pub async fn run_control_loop(
    controller: &mut CapacityController,
    poll_interval: Duration,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick_count: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                log::debug!("Control loop stopped after {tick_count} tick(s)");
                break;
            }
            _ = interval.tick() => {}
        }

        tick_count += 1;
        match controller.tick().await {
            Ok(report) => {
                log::debug!(
                    "Tick {tick_count}: evicted {}, submitted {}, failed {}, in flight {}",
                    report.evicted.len(),
                    report.submitted.len(),
                    report.failed_submissions,
                    report.counts.in_flight()
                );
            }
            Err(TickError::Gateway(
                error @ (GatewayError::Unavailable(_) | GatewayError::Timeout(_)),
            )) if tick_count == 1 => {
                return Err(anyhow::anyhow!("Cannot reach the scheduler: {error}"));
            }
            Err(TickError::Ledger(error)) => {
                log::error!("Job bookkeeping is inconsistent, tick {tick_count} was aborted: {error}");
            }
            Err(TickError::Gateway(error)) => {
                log::warn!(
                    "Tick {tick_count} failed, retrying in {}: {error}",
                    humantime::format_duration(poll_interval)
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::run_control_loop;
    use crate::tests::utils::{ControllerBuilder, TestGateway, create_controller, init_logging};

    const INTERVAL: Duration = Duration::from_secs(30);

    fn stop_after(token: &CancellationToken, duration: Duration) -> impl Future<Output = ()> {
        let token = token.clone();
        async move {
            tokio::time::sleep(duration).await;
            token.cancel();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tick_periodically_until_stopped() {
        init_logging();
        let (mut controller, gateway) = create_controller(2, 20);
        let token = CancellationToken::new();

        let (result, _) = tokio::join!(
            run_control_loop(&mut controller, INTERVAL, token.clone()),
            stop_after(&token, Duration::from_secs(95))
        );
        result.unwrap();
        // Ticks at 0, 30, 60 and 90 seconds
        assert_eq!(gateway.state().query_calls, 4);
        assert_eq!(gateway.state().submit_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick() {
        let (mut controller, gateway) = create_controller(2, 20);
        let token = CancellationToken::new();
        token.cancel();

        run_control_loop(&mut controller, INTERVAL, token)
            .await
            .unwrap();
        assert_eq!(gateway.state().query_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_when_scheduler_is_unreachable_at_start() {
        let (mut controller, gateway) = create_controller(2, 20);
        gateway.state().unavailable = true;

        let result = run_control_loop(&mut controller, INTERVAL, CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(gateway.state().query_calls, 1);
        assert_eq!(gateway.state().submit_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_when_scheduler_does_not_answer_at_start() {
        let gateway = TestGateway::default();
        let mut controller = ControllerBuilder::default()
            .target_running(3)
            .gateway_timeout(Duration::from_secs(1))
            .build(&gateway);
        gateway.state().query_delay = Some(Duration::from_secs(120));

        let result = run_control_loop(&mut controller, INTERVAL, CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(gateway.state().submit_attempts, 0);
        assert!(controller.ledger().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_submissions_when_stopped_during_tick() {
        let (mut controller, gateway) = create_controller(3, 20);
        gateway.state().submit_delay = Some(Duration::from_secs(5));
        let token = CancellationToken::new();

        let (result, _) = tokio::join!(
            run_control_loop(&mut controller, INTERVAL, token.clone()),
            stop_after(&token, Duration::from_secs(1))
        );
        result.unwrap();
        assert_eq!(gateway.state().submit_attempts, 3);
        assert_eq!(gateway.state().query_calls, 1);
        assert_eq!(controller.ledger().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn survive_later_outage() {
        let (mut controller, gateway) = create_controller(2, 20);
        let token = CancellationToken::new();

        let outage = {
            let gateway = gateway.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(45)).await;
                gateway.state().unavailable = true;
            }
        };
        let (result, _, _) = tokio::join!(
            run_control_loop(&mut controller, INTERVAL, token.clone()),
            outage,
            stop_after(&token, Duration::from_secs(95))
        );
        result.unwrap();
        assert_eq!(gateway.state().query_calls, 4);
        assert_eq!(controller.ledger().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn survive_bookkeeping_error() {
        let (mut controller, gateway) = create_controller(2, 20);
        gateway.state().fixed_id = Some("1".to_string());
        let token = CancellationToken::new();

        let (result, _) = tokio::join!(
            run_control_loop(&mut controller, INTERVAL, token.clone()),
            stop_after(&token, Duration::from_secs(35))
        );
        result.unwrap();
        assert_eq!(gateway.state().query_calls, 2);
        assert_eq!(controller.ledger().len(), 1);
    }
}
