//! Background maintenance tasks: violation point decay and the mute
//! expiry sweeper.

use crate::config::DecayConfig;
use crate::gateway::ChatGateway;
use crate::mutes::MuteRegistry;
use crate::store::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Periodically subtracts points from ledgers that have stayed clean.
pub fn spawn_point_decay(db: Arc<Database>, config: DecayConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(Duration::from_secs(config.check_minutes.max(1) * 60));
        // The first tick of a tokio interval fires immediately; skip it so
        // startup does not decay anything.
        timer.tick().await;
        loop {
            timer.tick().await;
            let db = db.clone();
            let result = tokio::task::spawn_blocking(move || {
                db.decay_violation_points(config.idle_hours, config.amount)
            })
            .await;
            match result {
                Ok(Ok(affected)) if affected > 0 => {
                    log::info!("violation decay reduced points for {affected} players");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::error!("violation decay failed: {e}"),
                Err(e) => log::error!("violation decay task died: {e}"),
            }
        }
    })
}

/// Periodically clears expired mutes and notifies affected players. The
/// sweep uses the same compare-and-remove as the lazy read path, so the
/// two never double-fire the durable write.
pub fn spawn_mute_sweeper(
    registry: Arc<MuteRegistry>,
    gateway: Arc<dyn ChatGateway>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(every.max(Duration::from_secs(1)));
        timer.tick().await;
        loop {
            timer.tick().await;
            for player in registry.sweep_expired() {
                if gateway.is_online(player) {
                    gateway.notify_player(player, "Your mute has expired.");
                }
            }
        }
    })
}
