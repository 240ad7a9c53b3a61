//! The seam between the moderation core and the chat platform.
//!
//! Everything player-facing (delivering notices, disconnecting, enforcing a
//! ban at the door) happens behind this trait so the core never blocks on,
//! or knows about, the embedding server.

use uuid::Uuid;

pub trait ChatGateway: Send + Sync {
    /// Whether the player is currently connected. Side effects for absent
    /// players are skipped by callers.
    fn is_online(&self, player: Uuid) -> bool;

    /// Delivers a moderation notice to a single player.
    fn notify_player(&self, player: Uuid, message: &str);

    /// Disconnects the player immediately.
    fn kick(&self, player: Uuid, reason: &str);

    /// Refuses future connections; `duration_minutes <= 0` is indefinite.
    fn ban(&self, player: Uuid, reason: &str, duration_minutes: i64);

    /// Lifts a platform-level ban.
    fn unban(&self, player: Uuid);

    /// Broadcasts to online staff.
    fn staff_alert(&self, message: &str);
}

/// Gateway that logs and does nothing else. Useful for headless tools and
/// as a default while embedding.
pub struct NullGateway;

impl ChatGateway for NullGateway {
    fn is_online(&self, _player: Uuid) -> bool {
        false
    }

    fn notify_player(&self, player: Uuid, message: &str) {
        log::debug!("notice to {player}: {message}");
    }

    fn kick(&self, player: Uuid, reason: &str) {
        log::info!("kick {player}: {reason}");
    }

    fn ban(&self, player: Uuid, reason: &str, duration_minutes: i64) {
        log::info!("ban {player} ({duration_minutes}m): {reason}");
    }

    fn unban(&self, player: Uuid) {
        log::info!("unban {player}");
    }

    fn staff_alert(&self, message: &str) {
        log::info!("staff alert: {message}");
    }
}
