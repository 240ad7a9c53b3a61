//! Durable ledger: violations, punishments, per-player points and appeals.
//!
//! Decision-path reads and the atomic point upsert are synchronous calls
//! under the connection lock; everything the hot path does not need to
//! wait for goes through [`StoreWriter`], an unbounded channel drained by
//! a background task. A lost fire-and-forget write costs an audit row,
//! never a moderation decision.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MuteInfo {
    pub player: Uuid,
    pub reason: Option<String>,
    /// `None` means indefinite.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PlayerLedger {
    pub player_name: String,
    pub violation_points: i64,
    pub total_violations: i64,
    pub last_violation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ViolationRow {
    pub id: i64,
    pub player: Uuid,
    pub player_name: String,
    pub message: String,
    pub category: String,
    pub score: f64,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealStatus {
    Pending,
    Approved,
    Denied,
}

impl AppealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppealStatus::Pending => "pending",
            AppealStatus::Approved => "approved",
            AppealStatus::Denied => "denied",
        }
    }

    fn from_sql(value: &str) -> AppealStatus {
        match value {
            "approved" => AppealStatus::Approved,
            "denied" => AppealStatus::Denied,
            _ => AppealStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppealRow {
    pub id: i64,
    pub player: Uuid,
    pub player_name: String,
    pub punishment_id: i64,
    pub punishment_type: String,
    pub reason: String,
    pub status: AppealStatus,
    pub reviewer_name: Option<String>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
pub struct GlobalCounts {
    pub total_violations: i64,
    pub unique_players: i64,
    pub total_mutes: i64,
    pub total_kicks: i64,
    pub total_bans: i64,
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            log::warn!("unparseable timestamp in store: {value:?}");
            DateTime::<Utc>::MIN_UTC
        })
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database: {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// Fresh in-memory database, used by tests and the demo CLI.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS violations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                player_name TEXT NOT NULL,
                message TEXT NOT NULL,
                category TEXT NOT NULL,
                score REAL NOT NULL,
                action TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS punishments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                player_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                reason TEXT,
                duration_minutes INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                original_message TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS player_data (
                uuid TEXT PRIMARY KEY,
                player_name TEXT NOT NULL,
                violation_points INTEGER NOT NULL DEFAULT 0,
                total_violations INTEGER NOT NULL DEFAULT 0,
                last_violation TEXT
            );
            CREATE TABLE IF NOT EXISTS appeals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                player_name TEXT NOT NULL,
                punishment_id INTEGER NOT NULL,
                punishment_type TEXT NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reviewer_name TEXT,
                review_note TEXT,
                created_at TEXT NOT NULL,
                reviewed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_violations_uuid ON violations(uuid);
            CREATE INDEX IF NOT EXISTS idx_punishments_uuid ON punishments(uuid);
            CREATE INDEX IF NOT EXISTS idx_punishments_active_kind ON punishments(active, kind);
            CREATE INDEX IF NOT EXISTS idx_appeals_uuid ON appeals(uuid);
            CREATE INDEX IF NOT EXISTS idx_appeals_status ON appeals(status);",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomic upsert-and-add: creates the ledger row on first violation and
    /// adds points, the violation counter and the last-violation time in a
    /// single statement.
    pub fn add_violation_points(&self, player: Uuid, player_name: &str, points: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO player_data (uuid, player_name, violation_points, total_violations, last_violation)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(uuid) DO UPDATE SET
                 player_name = excluded.player_name,
                 violation_points = player_data.violation_points + excluded.violation_points,
                 total_violations = player_data.total_violations + 1,
                 last_violation = excluded.last_violation",
            params![player.to_string(), player_name, points, now_ts()],
        )?;
        Ok(())
    }

    pub fn violation_points(&self, player: Uuid) -> Result<i64> {
        let conn = self.lock();
        let points = conn
            .query_row(
                "SELECT violation_points FROM player_data WHERE uuid = ?1",
                params![player.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(points.unwrap_or(0))
    }

    pub fn player_ledger(&self, player: Uuid) -> Result<Option<PlayerLedger>> {
        let conn = self.lock();
        let ledger = conn
            .query_row(
                "SELECT player_name, violation_points, total_violations, last_violation
                 FROM player_data WHERE uuid = ?1",
                params![player.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(ledger.map(|(player_name, violation_points, total_violations, last)| {
            PlayerLedger {
                player_name,
                violation_points,
                total_violations,
                last_violation: last.as_deref().map(parse_ts),
            }
        }))
    }

    /// Appends a violation row with action `pending` and returns its id.
    pub fn log_violation(
        &self,
        player: Uuid,
        player_name: &str,
        message: &str,
        category: &str,
        score: f64,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO violations (uuid, player_name, message, category, score, action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                player.to_string(),
                player_name,
                message,
                category,
                score,
                now_ts()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_violation_action(&self, violation_id: i64, action: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE violations SET action = ?1 WHERE id = ?2",
            params![action, violation_id],
        )?;
        Ok(())
    }

    pub fn player_history(&self, player: Uuid, limit: usize) -> Result<Vec<ViolationRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, uuid, player_name, message, category, score, action, created_at
             FROM violations WHERE uuid = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![player.to_string(), limit as i64], map_violation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_punishment(
        &self,
        player: Uuid,
        player_name: &str,
        kind: &str,
        reason: &str,
        duration_minutes: i64,
        original_message: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO punishments
                 (uuid, player_name, kind, reason, duration_minutes, active, original_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
            params![
                player.to_string(),
                player_name,
                kind,
                reason,
                duration_minutes,
                original_message,
                now_ts()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Marks every active punishment of the given kind inactive. Idempotent:
    /// repeated calls simply match zero rows.
    pub fn deactivate_punishments(&self, player: Uuid, kind: &str) -> Result<usize> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE punishments SET active = 0 WHERE uuid = ?1 AND kind = ?2 AND active = 1",
            params![player.to_string(), kind],
        )?;
        Ok(changed)
    }

    /// All mute rows that are still in force. Rows already expired at read
    /// time are reconciled (marked inactive) and excluded, which is the
    /// startup-rebuild contract of the in-memory index.
    pub fn active_mutes(&self) -> Result<Vec<MuteInfo>> {
        let raw: Vec<(String, Option<String>, i64, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare(
                "SELECT uuid, reason, duration_minutes, created_at
                 FROM punishments WHERE kind = 'mute' AND active = 1",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let now = Utc::now();
        let mut mutes = Vec::new();
        for (uuid, reason, duration_minutes, created_at) in raw {
            let player = match Uuid::parse_str(&uuid) {
                Ok(player) => player,
                Err(e) => {
                    log::warn!("skipping mute row with bad uuid {uuid:?}: {e}");
                    continue;
                }
            };
            if duration_minutes <= 0 {
                mutes.push(MuteInfo {
                    player,
                    reason,
                    expires_at: None,
                });
                continue;
            }
            let expires_at = parse_ts(&created_at) + chrono::Duration::minutes(duration_minutes);
            if now < expires_at {
                mutes.push(MuteInfo {
                    player,
                    reason,
                    expires_at: Some(expires_at),
                });
            } else {
                self.deactivate_punishments(player, "mute")?;
            }
        }
        Ok(mutes)
    }

    /// Whether the player's most recent punishment of this kind is still in
    /// force. An expired row is lazily marked inactive.
    pub fn has_active_punishment(&self, player: Uuid, kind: &str) -> Result<bool> {
        let row: Option<(i64, String)> = {
            let conn = self.lock();
            conn.query_row(
                "SELECT duration_minutes, created_at FROM punishments
                 WHERE uuid = ?1 AND kind = ?2 AND active = 1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![player.to_string(), kind],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        match row {
            None => Ok(false),
            Some((duration_minutes, _)) if duration_minutes <= 0 => Ok(true),
            Some((duration_minutes, created_at)) => {
                let expires_at = parse_ts(&created_at) + chrono::Duration::minutes(duration_minutes);
                if Utc::now() < expires_at {
                    Ok(true)
                } else {
                    self.deactivate_punishments(player, kind)?;
                    Ok(false)
                }
            }
        }
    }

    pub fn has_active_ban(&self, player: Uuid) -> Result<bool> {
        self.has_active_punishment(player, "ban")
    }

    pub fn latest_punishment_id(&self, player: Uuid, kind: &str) -> Result<Option<i64>> {
        let conn = self.lock();
        let id = conn
            .query_row(
                "SELECT id FROM punishments WHERE uuid = ?1 AND kind = ?2
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![player.to_string(), kind],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Subtracts `amount` points (floored at zero) from every ledger whose
    /// last violation is older than `idle_hours`. Returns affected rows.
    pub fn decay_violation_points(&self, idle_hours: u64, amount: i64) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::hours(idle_hours as i64))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE player_data SET violation_points = MAX(0, violation_points - ?1)
             WHERE violation_points > 0 AND last_violation IS NOT NULL AND last_violation < ?2",
            params![amount, cutoff],
        )?;
        Ok(changed)
    }

    pub fn reset_violation_points(&self, player: Uuid) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE player_data SET violation_points = 0 WHERE uuid = ?1",
            params![player.to_string()],
        )?;
        Ok(())
    }

    pub fn global_counts(&self) -> Result<GlobalCounts> {
        let conn = self.lock();
        let total_violations =
            conn.query_row("SELECT COUNT(*) FROM violations", [], |row| row.get(0))?;
        let unique_players = conn.query_row(
            "SELECT COUNT(DISTINCT uuid) FROM violations",
            [],
            |row| row.get(0),
        )?;
        let count_kind = |kind: &str| -> rusqlite::Result<i64> {
            conn.query_row(
                "SELECT COUNT(*) FROM punishments WHERE kind = ?1",
                params![kind],
                |row| row.get(0),
            )
        };
        Ok(GlobalCounts {
            total_violations,
            unique_players,
            total_mutes: count_kind("mute")?,
            total_kicks: count_kind("kick")?,
            total_bans: count_kind("ban")?,
        })
    }

    pub fn create_appeal(
        &self,
        player: Uuid,
        player_name: &str,
        punishment_id: i64,
        punishment_type: &str,
        reason: &str,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO appeals (uuid, player_name, punishment_id, punishment_type, reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                player.to_string(),
                player_name,
                punishment_id,
                punishment_type,
                reason,
                now_ts()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn appeal(&self, appeal_id: i64) -> Result<Option<AppealRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{APPEAL_SELECT} WHERE id = ?1"),
                params![appeal_id],
                map_appeal,
            )
            .optional()?;
        Ok(row)
    }

    pub fn pending_appeal_for(&self, player: Uuid) -> Result<Option<AppealRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{APPEAL_SELECT} WHERE uuid = ?1 AND status = 'pending' LIMIT 1"),
                params![player.to_string()],
                map_appeal,
            )
            .optional()?;
        Ok(row)
    }

    pub fn pending_appeals(&self) -> Result<Vec<AppealRow>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{APPEAL_SELECT} WHERE status = 'pending' ORDER BY created_at ASC"))?;
        let rows = stmt
            .query_map([], map_appeal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn appeals_for(&self, player: Uuid) -> Result<Vec<AppealRow>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{APPEAL_SELECT} WHERE uuid = ?1 ORDER BY created_at DESC"))?;
        let rows = stmt
            .query_map(params![player.to_string()], map_appeal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Resolves a pending appeal. The status guard in the WHERE clause makes
    /// double resolution a no-op that reports `false`.
    pub fn resolve_appeal(
        &self,
        appeal_id: i64,
        status: AppealStatus,
        reviewer: &str,
        note: &str,
    ) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE appeals SET status = ?1, reviewer_name = ?2, review_note = ?3, reviewed_at = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![status.as_str(), reviewer, note, now_ts(), appeal_id],
        )?;
        Ok(changed > 0)
    }

    /// Executes one queued fire-and-forget operation.
    pub fn apply(&self, op: StoreOp) -> Result<()> {
        match op {
            StoreOp::AddPunishment {
                player,
                player_name,
                kind,
                reason,
                duration_minutes,
                original_message,
            } => {
                self.add_punishment(
                    player,
                    &player_name,
                    &kind,
                    &reason,
                    duration_minutes,
                    original_message.as_deref(),
                )?;
            }
            StoreOp::DeactivatePunishments { player, kind } => {
                self.deactivate_punishments(player, &kind)?;
            }
            StoreOp::UpdateViolationAction {
                violation_id,
                action,
            } => {
                self.update_violation_action(violation_id, &action)?;
            }
        }
        Ok(())
    }
}

const APPEAL_SELECT: &str = "SELECT id, uuid, player_name, punishment_id, punishment_type, reason, \
     status, reviewer_name, review_note, created_at, reviewed_at FROM appeals";

fn map_violation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ViolationRow> {
    let uuid: String = row.get(1)?;
    let created_at: String = row.get(7)?;
    Ok(ViolationRow {
        id: row.get(0)?,
        player: Uuid::parse_str(&uuid).unwrap_or_else(|_| Uuid::nil()),
        player_name: row.get(2)?,
        message: row.get(3)?,
        category: row.get(4)?,
        score: row.get(5)?,
        action: row.get(6)?,
        created_at: parse_ts(&created_at),
    })
}

fn map_appeal(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppealRow> {
    let uuid: String = row.get(1)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    let reviewed_at: Option<String> = row.get(10)?;
    Ok(AppealRow {
        id: row.get(0)?,
        player: Uuid::parse_str(&uuid).unwrap_or_else(|_| Uuid::nil()),
        player_name: row.get(2)?,
        punishment_id: row.get(3)?,
        punishment_type: row.get(4)?,
        reason: row.get(5)?,
        status: AppealStatus::from_sql(&status),
        reviewer_name: row.get(7)?,
        review_note: row.get(8)?,
        created_at: parse_ts(&created_at),
        reviewed_at: reviewed_at.as_deref().map(parse_ts),
    })
}

/// Fire-and-forget durable writes submitted from the hot path.
#[derive(Debug)]
pub enum StoreOp {
    AddPunishment {
        player: Uuid,
        player_name: String,
        kind: String,
        reason: String,
        duration_minutes: i64,
        original_message: Option<String>,
    },
    DeactivatePunishments {
        player: Uuid,
        kind: String,
    },
    UpdateViolationAction {
        violation_id: i64,
        action: String,
    },
}

/// Handle to the background writer task. Cheap to clone; submission never
/// blocks the caller.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreOp>,
    submitted: Arc<AtomicU64>,
}

impl StoreWriter {
    /// Spawns the writer task on the current tokio runtime.
    pub fn spawn(db: Arc<Database>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreOp>();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let db = db.clone();
                match tokio::task::spawn_blocking(move || db.apply(op)).await {
                    Ok(Err(e)) => log::error!("durable write failed: {e}"),
                    Err(e) => log::error!("store writer worker died: {e}"),
                    Ok(Ok(())) => {}
                }
            }
            log::debug!("store writer channel closed");
        });
        StoreWriter {
            tx,
            submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn submit(&self, op: StoreOp) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(op).is_err() {
            log::warn!("store writer gone, dropping durable write");
        }
    }

    /// Number of operations submitted over the writer's lifetime.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate_last_violation(db: &Database, player: Uuid, hours_ago: i64) {
        let ts = (Utc::now() - chrono::Duration::hours(hours_ago))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        db.lock()
            .execute(
                "UPDATE player_data SET last_violation = ?1 WHERE uuid = ?2",
                params![ts, player.to_string()],
            )
            .unwrap();
    }

    fn backdate_punishment(db: &Database, punishment_id: i64, minutes_ago: i64) {
        let ts = (Utc::now() - chrono::Duration::minutes(minutes_ago))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        db.lock()
            .execute(
                "UPDATE punishments SET created_at = ?1 WHERE id = ?2",
                params![ts, punishment_id],
            )
            .unwrap();
    }

    #[test]
    fn point_upsert_accumulates() {
        let db = Database::open_in_memory().unwrap();
        let player = Uuid::new_v4();

        assert_eq!(db.violation_points(player).unwrap(), 0);
        db.add_violation_points(player, "alice", 2).unwrap();
        db.add_violation_points(player, "alice", 3).unwrap();
        assert_eq!(db.violation_points(player).unwrap(), 5);

        let ledger = db.player_ledger(player).unwrap().unwrap();
        assert_eq!(ledger.total_violations, 2);
        assert_eq!(ledger.player_name, "alice");
        assert!(ledger.last_violation.is_some());
    }

    #[test]
    fn violation_log_and_action_update() {
        let db = Database::open_in_memory().unwrap();
        let player = Uuid::new_v4();

        let id = db
            .log_violation(player, "bob", "bad message", "harassment", 0.92)
            .unwrap();
        db.update_violation_action(id, "mute").unwrap();

        let history = db.player_history(player, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "mute");
        assert_eq!(history[0].category, "harassment");
        assert!((history[0].score - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn active_mutes_reconciles_expired_rows() {
        let db = Database::open_in_memory().unwrap();
        let fresh = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let forever = Uuid::new_v4();

        db.add_punishment(fresh, "fresh", "mute", "spam", 60, None)
            .unwrap();
        let stale_id = db
            .add_punishment(stale, "stale", "mute", "spam", 5, None)
            .unwrap();
        backdate_punishment(&db, stale_id, 30);
        db.add_punishment(forever, "forever", "mute", "spam", -1, None)
            .unwrap();

        let mutes = db.active_mutes().unwrap();
        let players: Vec<Uuid> = mutes.iter().map(|m| m.player).collect();
        assert!(players.contains(&fresh));
        assert!(players.contains(&forever));
        assert!(!players.contains(&stale));

        // The stale row was marked inactive during the read.
        assert!(!db.has_active_punishment(stale, "mute").unwrap());
        assert!(db.active_mutes().unwrap().len() == 2);
    }

    #[test]
    fn ban_expiry_is_lazy() {
        let db = Database::open_in_memory().unwrap();
        let player = Uuid::new_v4();

        let id = db
            .add_punishment(player, "carol", "ban", "violence", 10, None)
            .unwrap();
        assert!(db.has_active_ban(player).unwrap());

        backdate_punishment(&db, id, 30);
        assert!(!db.has_active_ban(player).unwrap());
        // Second check hits the already-deactivated row.
        assert!(!db.has_active_ban(player).unwrap());
    }

    #[test]
    fn indefinite_ban_never_expires() {
        let db = Database::open_in_memory().unwrap();
        let player = Uuid::new_v4();
        let id = db
            .add_punishment(player, "dave", "ban", "violence", -1, None)
            .unwrap();
        backdate_punishment(&db, id, 100_000);
        assert!(db.has_active_ban(player).unwrap());
    }

    #[test]
    fn decay_respects_idle_cutoff_and_floor() {
        let db = Database::open_in_memory().unwrap();
        let idle = Uuid::new_v4();
        let recent = Uuid::new_v4();

        db.add_violation_points(idle, "idle", 2).unwrap();
        db.add_violation_points(recent, "recent", 5).unwrap();
        backdate_last_violation(&db, idle, 48);

        let affected = db.decay_violation_points(24, 3).unwrap();
        assert_eq!(affected, 1);
        // Floored at zero, not negative.
        assert_eq!(db.violation_points(idle).unwrap(), 0);
        assert_eq!(db.violation_points(recent).unwrap(), 5);
    }

    #[test]
    fn appeal_rows_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let player = Uuid::new_v4();
        let punishment_id = db
            .add_punishment(player, "erin", "mute", "spam", 60, None)
            .unwrap();

        let appeal_id = db
            .create_appeal(player, "erin", punishment_id, "mute", "I was framed")
            .unwrap();

        let appeal = db.appeal(appeal_id).unwrap().unwrap();
        assert_eq!(appeal.status, AppealStatus::Pending);
        assert_eq!(appeal.punishment_id, punishment_id);
        assert!(db.pending_appeal_for(player).unwrap().is_some());
        assert_eq!(db.pending_appeals().unwrap().len(), 1);

        assert!(db
            .resolve_appeal(appeal_id, AppealStatus::Denied, "mod", "no")
            .unwrap());
        // Second resolution matches nothing.
        assert!(!db
            .resolve_appeal(appeal_id, AppealStatus::Approved, "mod", "yes")
            .unwrap());
        let appeal = db.appeal(appeal_id).unwrap().unwrap();
        assert_eq!(appeal.status, AppealStatus::Denied);
        assert_eq!(appeal.reviewer_name.as_deref(), Some("mod"));
        assert!(appeal.reviewed_at.is_some());
        assert!(db.pending_appeal_for(player).unwrap().is_none());
    }

    #[test]
    fn global_counts_tally_by_kind() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        db.log_violation(a, "a", "x", "spam", 0.9).unwrap();
        db.log_violation(a, "a", "y", "spam", 0.9).unwrap();
        db.log_violation(b, "b", "z", "hate", 0.8).unwrap();
        db.add_punishment(a, "a", "mute", "spam", 10, None).unwrap();
        db.add_punishment(b, "b", "ban", "hate", -1, None).unwrap();

        let counts = db.global_counts().unwrap();
        assert_eq!(counts.total_violations, 3);
        assert_eq!(counts.unique_players, 2);
        assert_eq!(counts.total_mutes, 1);
        assert_eq!(counts.total_bans, 1);
        assert_eq!(counts.total_kicks, 0);
    }

    #[tokio::test]
    async fn store_writer_applies_ops() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let writer = StoreWriter::spawn(db.clone());
        let player = Uuid::new_v4();

        writer.submit(StoreOp::AddPunishment {
            player,
            player_name: "frank".to_string(),
            kind: "mute".to_string(),
            reason: "spam".to_string(),
            duration_minutes: 60,
            original_message: Some("buy gold".to_string()),
        });

        // The writer drains asynchronously; poll briefly.
        for _ in 0..50 {
            if db.has_active_punishment(player, "mute").unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(db.has_active_punishment(player, "mute").unwrap());
        assert_eq!(writer.submitted(), 1);
    }
}
