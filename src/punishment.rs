//! Punishment kinds, escalation spec parsing and execution.
//!
//! Config strings like `MUTE:10m` are parsed exactly once, at load time,
//! into [`PunishmentSpec`]; an unknown kind is a load error rather than a
//! silently skipped punishment at runtime.

use crate::gateway::ChatGateway;
use crate::mutes::{MuteExpiry, MuteRegistry};
use crate::stats::ModerationStats;
use crate::store::{StoreOp, StoreWriter};
use crate::text::{format_duration_minutes, parse_duration_minutes};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunishmentKind {
    Warn,
    Mute,
    Kick,
    Ban,
}

impl PunishmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentKind::Warn => "warn",
            PunishmentKind::Mute => "mute",
            PunishmentKind::Kick => "kick",
            PunishmentKind::Ban => "ban",
        }
    }
}

impl fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PunishmentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warn" => Ok(PunishmentKind::Warn),
            "mute" => Ok(PunishmentKind::Mute),
            "kick" => Ok(PunishmentKind::Kick),
            "ban" => Ok(PunishmentKind::Ban),
            other => Err(anyhow::anyhow!("unknown punishment kind: {other:?}")),
        }
    }
}

/// A parsed escalation target: what to do and, for mute/ban, for how long.
/// `duration_minutes <= 0` means indefinite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentSpec {
    pub kind: PunishmentKind,
    pub duration_minutes: i64,
}

impl PunishmentSpec {
    /// Parses strings of the form `WARN`, `KICK`, `MUTE:10m`, `BAN:1d`,
    /// `MUTE:permanent`. A mute or ban without a duration is indefinite.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let mut parts = spec.splitn(2, ':');
        let kind: PunishmentKind = parts
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|e| anyhow::anyhow!("bad punishment spec {spec:?}: {e}"))?;
        let duration_minutes = match parts.next() {
            Some(duration) => parse_duration_minutes(duration)
                .map_err(|e| anyhow::anyhow!("bad punishment spec {spec:?}: {e}"))?,
            None => match kind {
                PunishmentKind::Mute | PunishmentKind::Ban => -1,
                PunishmentKind::Warn | PunishmentKind::Kick => 0,
            },
        };
        Ok(PunishmentSpec {
            kind,
            duration_minutes,
        })
    }
}

impl fmt::Display for PunishmentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PunishmentKind::Mute | PunishmentKind::Ban => write!(
                f,
                "{}:{}",
                self.kind,
                format_duration_minutes(self.duration_minutes)
            ),
            _ => write!(f, "{}", self.kind),
        }
    }
}

/// Applies punishments: flips the in-memory mute index, queues durable
/// rows and routes player-facing effects through the gateway. Gateway
/// effects are skipped for players who are no longer online; state changes
/// are not, since mutes and bans outlive a session.
pub struct PunishmentExecutor {
    registry: Arc<MuteRegistry>,
    writer: StoreWriter,
    gateway: Arc<dyn ChatGateway>,
    stats: Arc<ModerationStats>,
}

impl PunishmentExecutor {
    pub fn new(
        registry: Arc<MuteRegistry>,
        writer: StoreWriter,
        gateway: Arc<dyn ChatGateway>,
        stats: Arc<ModerationStats>,
    ) -> Self {
        PunishmentExecutor {
            registry,
            writer,
            gateway,
            stats,
        }
    }

    pub fn execute(
        &self,
        player: Uuid,
        player_name: &str,
        spec: &PunishmentSpec,
        reason: &str,
        original_message: Option<&str>,
    ) {
        match spec.kind {
            PunishmentKind::Warn => self.warn(player, player_name, reason),
            PunishmentKind::Mute => self.mute(
                player,
                player_name,
                reason,
                spec.duration_minutes,
                original_message,
            ),
            PunishmentKind::Kick => self.kick(player, player_name, reason),
            PunishmentKind::Ban => self.ban(
                player,
                player_name,
                reason,
                spec.duration_minutes,
                original_message,
            ),
        }
    }

    pub fn warn(&self, player: Uuid, player_name: &str, reason: &str) {
        self.stats.record_punishment(PunishmentKind::Warn);
        if self.gateway.is_online(player) {
            self.gateway
                .notify_player(player, &format!("Warning: {reason}"));
        }
        self.gateway
            .staff_alert(&format!("{player_name} was warned: {reason}"));
    }

    pub fn mute(
        &self,
        player: Uuid,
        player_name: &str,
        reason: &str,
        duration_minutes: i64,
        original_message: Option<&str>,
    ) {
        self.stats.record_punishment(PunishmentKind::Mute);
        self.registry
            .set(player, MuteExpiry::from_minutes(duration_minutes));
        self.writer.submit(StoreOp::AddPunishment {
            player,
            player_name: player_name.to_string(),
            kind: "mute".to_string(),
            reason: reason.to_string(),
            duration_minutes,
            original_message: original_message.map(str::to_string),
        });

        let duration = format_duration_minutes(duration_minutes);
        if self.gateway.is_online(player) {
            self.gateway.notify_player(
                player,
                &format!("You have been muted ({duration}): {reason}"),
            );
        }
        self.gateway
            .staff_alert(&format!("{player_name} was muted ({duration}): {reason}"));
    }

    pub fn unmute(&self, player: Uuid) {
        self.registry.remove(player);
        self.writer.submit(StoreOp::DeactivatePunishments {
            player,
            kind: "mute".to_string(),
        });
        if self.gateway.is_online(player) {
            self.gateway
                .notify_player(player, "You are no longer muted.");
        }
    }

    pub fn kick(&self, player: Uuid, player_name: &str, reason: &str) {
        self.stats.record_punishment(PunishmentKind::Kick);
        self.writer.submit(StoreOp::AddPunishment {
            player,
            player_name: player_name.to_string(),
            kind: "kick".to_string(),
            reason: reason.to_string(),
            duration_minutes: 0,
            original_message: None,
        });
        if self.gateway.is_online(player) {
            self.gateway.kick(player, reason);
        }
        self.gateway
            .staff_alert(&format!("{player_name} was kicked: {reason}"));
    }

    pub fn ban(
        &self,
        player: Uuid,
        player_name: &str,
        reason: &str,
        duration_minutes: i64,
        original_message: Option<&str>,
    ) {
        self.stats.record_punishment(PunishmentKind::Ban);
        self.writer.submit(StoreOp::AddPunishment {
            player,
            player_name: player_name.to_string(),
            kind: "ban".to_string(),
            reason: reason.to_string(),
            duration_minutes,
            original_message: original_message.map(str::to_string),
        });
        let duration = format_duration_minutes(duration_minutes);
        if self.gateway.is_online(player) {
            self.gateway.ban(player, reason, duration_minutes);
        }
        self.gateway
            .staff_alert(&format!("{player_name} was banned ({duration}): {reason}"));
    }

    pub fn unban(&self, player: Uuid) {
        self.writer.submit(StoreOp::DeactivatePunishments {
            player,
            kind: "ban".to_string(),
        });
        self.gateway.unban(player);
    }
}
