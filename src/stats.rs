//! Process-wide moderation counters.
//!
//! Plain atomics with a snapshot accessor; exporting them anywhere is the
//! embedder's business.

use crate::punishment::PunishmentKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ModerationStats {
    messages_processed: AtomicU64,
    filtered: AtomicU64,
    blacklisted: AtomicU64,
    api_successes: AtomicU64,
    api_failures: AtomicU64,
    violations: AtomicU64,
    warns: AtomicU64,
    mutes: AtomicU64,
    kicks: AtomicU64,
    bans: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_processed: u64,
    pub filtered: u64,
    pub blacklisted: u64,
    pub api_successes: u64,
    pub api_failures: u64,
    pub violations: u64,
    pub warns: u64,
    pub mutes: u64,
    pub kicks: u64,
    pub bans: u64,
}

impl ModerationStats {
    pub fn record_message(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blacklisted(&self) {
        self.blacklisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_call(&self, success: bool) {
        if success {
            self.api_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.api_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_punishment(&self, kind: PunishmentKind) {
        let counter = match kind {
            PunishmentKind::Warn => &self.warns,
            PunishmentKind::Mute => &self.mutes,
            PunishmentKind::Kick => &self.kicks,
            PunishmentKind::Ban => &self.bans,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            blacklisted: self.blacklisted.load(Ordering::Relaxed),
            api_successes: self.api_successes.load(Ordering::Relaxed),
            api_failures: self.api_failures.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            warns: self.warns.load(Ordering::Relaxed),
            mutes: self.mutes.load(Ordering::Relaxed),
            kicks: self.kicks.load(Ordering::Relaxed),
            bans: self.bans.load(Ordering::Relaxed),
        }
    }
}
