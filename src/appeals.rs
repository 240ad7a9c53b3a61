//! Appeal workflow: pending -> approved | denied.
//!
//! Invariant failures come back as explicit [`AppealError`] values the
//! caller can branch on; nothing here mutates state partially.

use crate::config::AppealConfig;
use crate::punishment::{PunishmentExecutor, PunishmentKind};
use crate::store::{AppealRow, AppealStatus, Database};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug)]
pub enum AppealError {
    /// The appeal system is switched off in config.
    Disabled,
    /// The player submitted an appeal too recently.
    OnCooldown { remaining_seconds: u64 },
    /// The player already has a pending appeal.
    AlreadyPending,
    /// No active punishment of the claimed kind exists.
    NoActivePunishment,
    /// No appeal with that id.
    NotFound,
    /// The appeal has already been resolved.
    NotPending,
    /// The durable store failed.
    Store(String),
}

impl fmt::Display for AppealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppealError::Disabled => write!(f, "the appeal system is disabled"),
            AppealError::OnCooldown { remaining_seconds } => {
                write!(f, "appeal cooldown active, {remaining_seconds}s remaining")
            }
            AppealError::AlreadyPending => write!(f, "an appeal is already pending"),
            AppealError::NoActivePunishment => {
                write!(f, "no active punishment of that kind to appeal")
            }
            AppealError::NotFound => write!(f, "appeal not found"),
            AppealError::NotPending => write!(f, "appeal is not pending"),
            AppealError::Store(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for AppealError {}

pub struct AppealService {
    db: Arc<Database>,
    executor: Arc<PunishmentExecutor>,
    enabled: bool,
    cooldown: Duration,
    cooldowns: Mutex<HashMap<Uuid, Instant>>,
}

impl AppealService {
    pub fn new(db: Arc<Database>, executor: Arc<PunishmentExecutor>, config: &AppealConfig) -> Self {
        AppealService {
            db,
            executor,
            enabled: config.enabled,
            cooldown: Duration::from_secs(config.cooldown_seconds),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    fn store_err(e: anyhow::Error) -> AppealError {
        log::error!("appeal store operation failed: {e}");
        AppealError::Store(e.to_string())
    }

    fn check_cooldown(&self, player: Uuid) -> Result<(), AppealError> {
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&at) = cooldowns.get(&player) {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                return Err(AppealError::OnCooldown {
                    remaining_seconds: (self.cooldown - elapsed).as_secs().max(1),
                });
            }
            cooldowns.remove(&player);
        }
        Ok(())
    }

    /// Files an appeal against the player's most recent active punishment
    /// of the given kind. Returns the new appeal id.
    pub fn create(
        &self,
        player: Uuid,
        player_name: &str,
        kind: PunishmentKind,
        reason: &str,
    ) -> Result<i64, AppealError> {
        if !self.enabled {
            return Err(AppealError::Disabled);
        }
        self.check_cooldown(player)?;

        if self
            .db
            .pending_appeal_for(player)
            .map_err(Self::store_err)?
            .is_some()
        {
            return Err(AppealError::AlreadyPending);
        }

        if !self
            .db
            .has_active_punishment(player, kind.as_str())
            .map_err(Self::store_err)?
        {
            return Err(AppealError::NoActivePunishment);
        }
        let punishment_id = self
            .db
            .latest_punishment_id(player, kind.as_str())
            .map_err(Self::store_err)?
            .ok_or(AppealError::NoActivePunishment)?;

        let appeal_id = self
            .db
            .create_appeal(player, player_name, punishment_id, kind.as_str(), reason)
            .map_err(Self::store_err)?;

        self.cooldowns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(player, Instant::now());
        log::info!("{player_name} filed appeal #{appeal_id} against a {kind}");
        Ok(appeal_id)
    }

    /// Approves a pending appeal and reverses the underlying punishment.
    pub fn approve(&self, appeal_id: i64, reviewer: &str, note: &str) -> Result<(), AppealError> {
        let appeal = self.load_pending(appeal_id)?;

        if !self
            .db
            .resolve_appeal(appeal_id, AppealStatus::Approved, reviewer, note)
            .map_err(Self::store_err)?
        {
            // Lost a race with another reviewer.
            return Err(AppealError::NotPending);
        }

        match appeal.punishment_type.as_str() {
            "mute" => self.executor.unmute(appeal.player),
            "ban" => self.executor.unban(appeal.player),
            // Warns and kicks have nothing to reverse.
            _ => {}
        }
        log::info!("appeal #{appeal_id} approved by {reviewer}");
        Ok(())
    }

    /// Denies a pending appeal; punishment state is untouched.
    pub fn deny(&self, appeal_id: i64, reviewer: &str, note: &str) -> Result<(), AppealError> {
        self.load_pending(appeal_id)?;

        if !self
            .db
            .resolve_appeal(appeal_id, AppealStatus::Denied, reviewer, note)
            .map_err(Self::store_err)?
        {
            return Err(AppealError::NotPending);
        }
        log::info!("appeal #{appeal_id} denied by {reviewer}");
        Ok(())
    }

    fn load_pending(&self, appeal_id: i64) -> Result<AppealRow, AppealError> {
        let appeal = self
            .db
            .appeal(appeal_id)
            .map_err(Self::store_err)?
            .ok_or(AppealError::NotFound)?;
        if appeal.status != AppealStatus::Pending {
            return Err(AppealError::NotPending);
        }
        Ok(appeal)
    }

    pub fn pending(&self) -> Result<Vec<AppealRow>, AppealError> {
        self.db.pending_appeals().map_err(Self::store_err)
    }

    pub fn for_player(&self, player: Uuid) -> Result<Vec<AppealRow>, AppealError> {
        self.db.appeals_for(player).map_err(Self::store_err)
    }
}
