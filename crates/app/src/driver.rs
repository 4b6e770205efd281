use std::sync::Arc;
use std::time::Duration;

use postbox_core::{Broker, SweepStats};
use postbox_push::WebhookPusher;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const PUSH_INTERVAL: Duration = Duration::from_millis(80);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Reserved for future heartbeat work.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// One task, three tickers: webhook pushes every 80 ms, the reclamation
/// sweep every minute, and a one-second heartbeat slot.
pub(crate) fn spawn(
    broker: Arc<Broker>,
    pusher: Arc<WebhookPusher>,
    stale_window: Duration,
    resurrection_window: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut push_tick = interval_at(Instant::now() + PUSH_INTERVAL, PUSH_INTERVAL);
        push_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_tick = interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sweep_tick.tick() => {
                    let stats = broker
                        .sweep_tombstones(stale_window, resurrection_window)
                        .await;
                    if stats != SweepStats::default() {
                        tracing::info!(?stats, "reclamation sweep");
                    }
                }
                _ = push_tick.tick() => {
                    let stats = pusher.run_cycle().await;
                    if stats.failed > 0 {
                        tracing::debug!(
                            delivered = stats.delivered,
                            failed = stats.failed,
                            "push cycle had failures"
                        );
                    }
                }
                _ = heartbeat.tick() => {}
            }
        }
    })
}
