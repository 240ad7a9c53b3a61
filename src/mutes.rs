//! In-memory index of currently muted players.
//!
//! This is the per-message "can this player speak" answer, so it never
//! touches the durable store on the read path. Expiry is lazy: the reader
//! that observes an expired entry removes it under the map lock and queues
//! the durable mark-inactive write. Because removal and the queueing happen
//! under the same lock, concurrent readers racing past the expiry boundary
//! produce exactly one write.

use crate::store::{Database, StoreOp, StoreWriter};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteExpiry {
    Indefinite,
    Until(DateTime<Utc>),
}

impl MuteExpiry {
    pub fn from_minutes(minutes: i64) -> MuteExpiry {
        if minutes <= 0 {
            MuteExpiry::Indefinite
        } else {
            MuteExpiry::Until(Utc::now() + chrono::Duration::minutes(minutes))
        }
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            MuteExpiry::Indefinite => false,
            MuteExpiry::Until(at) => now >= *at,
        }
    }

    /// Remaining minutes, `None` for indefinite, zero when already expired.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            MuteExpiry::Indefinite => None,
            MuteExpiry::Until(at) => Some(((*at - now).num_seconds().max(0) + 59) / 60),
        }
    }
}

pub struct MuteRegistry {
    entries: Mutex<HashMap<Uuid, MuteExpiry>>,
    writer: StoreWriter,
}

impl MuteRegistry {
    pub fn new(writer: StoreWriter) -> Self {
        MuteRegistry {
            entries: Mutex::new(HashMap::new()),
            writer,
        }
    }

    /// Rebuilds the index from the store's active mute rows. Rows expired
    /// at load time were already reconciled by the store read.
    pub fn load_from(&self, db: &Database) -> anyhow::Result<usize> {
        let mutes = db.active_mutes()?;
        let mut entries = self.lock();
        entries.clear();
        for mute in &mutes {
            let expiry = match mute.expires_at {
                Some(at) => MuteExpiry::Until(at),
                None => MuteExpiry::Indefinite,
            };
            entries.insert(mute.player, expiry);
        }
        Ok(entries.len())
    }

    pub fn set(&self, player: Uuid, expiry: MuteExpiry) {
        self.lock().insert(player, expiry);
    }

    /// Removes the in-memory entry only; the durable side is the caller's
    /// concern (an unmute deactivates rows, an expiry is queued here).
    pub fn remove(&self, player: Uuid) -> bool {
        self.lock().remove(&player).is_some()
    }

    pub fn is_muted(&self, player: Uuid) -> bool {
        let now = Utc::now();
        let mut entries = self.lock();
        match entries.get(&player) {
            None => false,
            Some(expiry) if !expiry.expired(now) => true,
            Some(_) => {
                // Compare-and-remove under the lock: only the first racer
                // gets here with the entry still present.
                entries.remove(&player);
                self.writer.submit(StoreOp::DeactivatePunishments {
                    player,
                    kind: "mute".to_string(),
                });
                false
            }
        }
    }

    pub fn expiry(&self, player: Uuid) -> Option<MuteExpiry> {
        self.lock().get(&player).copied()
    }

    /// Clears every expired entry, queueing one deactivation each, and
    /// returns the affected players so callers can notify them.
    pub fn sweep_expired(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut entries = self.lock();
        let expired: Vec<Uuid> = entries
            .iter()
            .filter(|(_, expiry)| expiry.expired(now))
            .map(|(player, _)| *player)
            .collect();
        for player in &expired {
            entries.remove(player);
            self.writer.submit(StoreOp::DeactivatePunishments {
                player: *player,
                kind: "mute".to_string(),
            });
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, MuteExpiry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn registry() -> (Arc<MuteRegistry>, Arc<Database>, StoreWriter) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let writer = StoreWriter::spawn(db.clone());
        (
            Arc::new(MuteRegistry::new(writer.clone())),
            db,
            writer,
        )
    }

    #[tokio::test]
    async fn mute_expiry_boundary() {
        let (registry, _db, _writer) = registry().await;
        let player = Uuid::new_v4();

        registry.set(player, MuteExpiry::Until(Utc::now() + chrono::Duration::minutes(5)));
        assert!(registry.is_muted(player));

        registry.set(player, MuteExpiry::Until(Utc::now() - chrono::Duration::seconds(1)));
        assert!(!registry.is_muted(player));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn indefinite_mute_never_expires() {
        let (registry, _db, _writer) = registry().await;
        let player = Uuid::new_v4();
        registry.set(player, MuteExpiry::Indefinite);
        assert!(registry.is_muted(player));
        assert_eq!(registry.expiry(player), Some(MuteExpiry::Indefinite));
    }

    #[tokio::test]
    async fn racing_expiry_checks_write_once() {
        let (registry, _db, writer) = registry().await;
        let player = Uuid::new_v4();
        registry.set(player, MuteExpiry::Until(Utc::now() - chrono::Duration::seconds(1)));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.is_muted(player) }));
        }
        for handle in handles {
            assert!(!handle.await.unwrap());
        }

        assert_eq!(writer.submitted(), 1);
    }

    #[tokio::test]
    async fn loads_active_mutes_from_store() {
        let (registry, db, _writer) = registry().await;
        let muted = Uuid::new_v4();
        let indefinite = Uuid::new_v4();

        db.add_punishment(muted, "alice", "mute", "spam", 60, None)
            .unwrap();
        db.add_punishment(indefinite, "bob", "mute", "hate", -1, None)
            .unwrap();

        let loaded = registry.load_from(&db).unwrap();
        assert_eq!(loaded, 2);
        assert!(registry.is_muted(muted));
        assert!(registry.is_muted(indefinite));
    }

    #[tokio::test]
    async fn sweep_returns_expired_players() {
        let (registry, _db, writer) = registry().await;
        let expired = Uuid::new_v4();
        let active = Uuid::new_v4();

        registry.set(expired, MuteExpiry::Until(Utc::now() - chrono::Duration::seconds(5)));
        registry.set(active, MuteExpiry::Until(Utc::now() + chrono::Duration::minutes(5)));

        let swept = registry.sweep_expired();
        assert_eq!(swept, vec![expired]);
        assert!(registry.is_muted(active));
        assert_eq!(writer.submitted(), 1);
    }

    #[test]
    fn remaining_minutes_rounds_up() {
        let now = Utc::now();
        let expiry = MuteExpiry::Until(now + chrono::Duration::seconds(90));
        assert_eq!(expiry.remaining_minutes(now), Some(2));
        assert_eq!(MuteExpiry::Indefinite.remaining_minutes(now), None);
    }
}
