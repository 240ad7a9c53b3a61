//! Local rule checks applied before any classification call.
//!
//! Checks run in a fixed order (slowmode, spam, flood, links, IPs, caps);
//! the first one to reject or rewrite the message wins. The per-player
//! history is updated whether the chain finishes or rejects, so flooding
//! cannot be reset by getting rejected.

use crate::config::{CapsAction, FilterConfig, LinkAction};
use crate::text::normalize;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

lazy_static! {
    static ref URL_PATTERN: Regex =
        Regex::new(r"(?i)(https?://)?([\w-]+\.)+[\w-]+(/[\w\-./?%&=]*)?").unwrap();
    // Also matches comma-separated octets, a common evasion of dot filters.
    static ref IP_PATTERN: Regex =
        Regex::new(r"\b(?:\d{1,3}[.,]){3}\d{1,3}(?::\d{1,5})?\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Slowmode,
    Spam,
    Flood,
    Link,
    Ip,
    Caps,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::Slowmode => "slowmode",
            FilterKind::Spam => "spam",
            FilterKind::Flood => "flood",
            FilterKind::Link => "link",
            FilterKind::Ip => "ip",
            FilterKind::Caps => "caps",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Allow,
    /// Message may pass with its text replaced (caps-lock rewrite).
    Rewrite(String),
    Deny {
        kind: FilterKind,
        reason: String,
    },
}

impl FilterVerdict {
    pub fn is_deny(&self) -> bool {
        matches!(self, FilterVerdict::Deny { .. })
    }
}

struct MessageRecord {
    normalized: String,
    at: Instant,
}

pub struct PreFilter {
    config: FilterConfig,
    history: Mutex<HashMap<Uuid, Vec<MessageRecord>>>,
    last_message: Mutex<HashMap<Uuid, Instant>>,
}

impl PreFilter {
    pub fn new(config: FilterConfig) -> Self {
        PreFilter {
            config,
            history: Mutex::new(HashMap::new()),
            last_message: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the full chain for one message and records it in the player's
    /// sliding history regardless of the outcome.
    pub fn check(&self, player: Uuid, message: &str) -> FilterVerdict {
        if let Some(verdict) = self.check_slowmode(player) {
            return verdict;
        }

        let verdict = self.run_checks(player, message);
        self.record(player, message);
        verdict
    }

    fn run_checks(&self, player: Uuid, message: &str) -> FilterVerdict {
        if self.config.spam.enabled {
            if let Some(verdict) = self.check_spam(player, message) {
                return verdict;
            }
        }
        if self.config.flood.enabled {
            if let Some(verdict) = self.check_flood(player) {
                return verdict;
            }
        }
        if self.config.links.enabled {
            if let Some(verdict) = self.check_links(message) {
                return verdict;
            }
        }
        if self.config.ip.enabled {
            if let Some(verdict) = self.check_ip(message) {
                return verdict;
            }
        }
        if self.config.caps.enabled {
            if let Some(verdict) = self.check_caps(message) {
                return verdict;
            }
        }
        FilterVerdict::Allow
    }

    fn check_slowmode(&self, player: Uuid) -> Option<FilterVerdict> {
        if !self.config.slowmode.enabled {
            return None;
        }
        let interval = Duration::from_secs(self.config.slowmode.interval_seconds);
        let mut last = self.last_message.lock().ok()?;
        let now = Instant::now();
        if let Some(&at) = last.get(&player) {
            let elapsed = now.duration_since(at);
            if elapsed < interval {
                let remaining = (interval - elapsed).as_secs() + 1;
                return Some(FilterVerdict::Deny {
                    kind: FilterKind::Slowmode,
                    reason: format!("Slow down, wait {remaining}s before chatting again"),
                });
            }
        }
        last.insert(player, now);
        None
    }

    fn check_spam(&self, player: Uuid, message: &str) -> Option<FilterVerdict> {
        let window = Duration::from_secs(self.config.spam.window_seconds);
        let normalized = normalize(message);
        let count = self.count_recent(player, Some(&normalized), window);
        if count >= self.config.spam.max_messages {
            return Some(FilterVerdict::Deny {
                kind: FilterKind::Spam,
                reason: "Stop repeating yourself".to_string(),
            });
        }
        None
    }

    fn check_flood(&self, player: Uuid) -> Option<FilterVerdict> {
        let window = Duration::from_secs(self.config.flood.window_seconds);
        let count = self.count_recent(player, None, window);
        if count >= self.config.flood.max_messages {
            return Some(FilterVerdict::Deny {
                kind: FilterKind::Flood,
                reason: "You are sending messages too quickly".to_string(),
            });
        }
        None
    }

    fn check_links(&self, message: &str) -> Option<FilterVerdict> {
        if !URL_PATTERN.is_match(message) {
            return None;
        }
        let lowered = message.to_lowercase();
        for allowed in &self.config.links.whitelist {
            if lowered.contains(&allowed.to_lowercase()) {
                return None;
            }
        }
        if self.config.links.action == LinkAction::Block {
            return Some(FilterVerdict::Deny {
                kind: FilterKind::Link,
                reason: "Links are not allowed in chat".to_string(),
            });
        }
        None
    }

    fn check_ip(&self, message: &str) -> Option<FilterVerdict> {
        if !IP_PATTERN.is_match(message) {
            return None;
        }
        for allowed in &self.config.ip.whitelist {
            if message.contains(allowed) {
                return None;
            }
        }
        Some(FilterVerdict::Deny {
            kind: FilterKind::Ip,
            reason: "Server addresses are not allowed in chat".to_string(),
        })
    }

    fn check_caps(&self, message: &str) -> Option<FilterVerdict> {
        if message.chars().count() < self.config.caps.min_length {
            return None;
        }
        let letters = message.chars().filter(|c| c.is_alphabetic()).count();
        if letters == 0 {
            return None;
        }
        let upper = message.chars().filter(|c| c.is_uppercase()).count();
        let percentage = (upper as f64 * 100.0) / letters as f64;
        if percentage <= self.config.caps.max_percentage {
            return None;
        }
        match self.config.caps.action {
            CapsAction::Lowercase => Some(FilterVerdict::Rewrite(message.to_lowercase())),
            CapsAction::Block => Some(FilterVerdict::Deny {
                kind: FilterKind::Caps,
                reason: "Too many capital letters".to_string(),
            }),
        }
    }

    /// Counts history entries within `window`, optionally only those whose
    /// normalized text matches. Prunes anything older than the longest
    /// configured window while it holds the lock.
    fn count_recent(&self, player: Uuid, normalized: Option<&str>, window: Duration) -> usize {
        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(_) => return 0,
        };
        let records = match history.get_mut(&player) {
            Some(records) => records,
            None => return 0,
        };

        let now = Instant::now();
        let retention = self.longest_window();
        records.retain(|record| now.duration_since(record.at) <= retention);

        records
            .iter()
            .filter(|record| now.duration_since(record.at) <= window)
            .filter(|record| normalized.map_or(true, |n| record.normalized == n))
            .count()
    }

    fn record(&self, player: Uuid, message: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.entry(player).or_default().push(MessageRecord {
                normalized: normalize(message),
                at: Instant::now(),
            });
        }
    }

    fn longest_window(&self) -> Duration {
        Duration::from_secs(std::cmp::max(
            self.config.spam.window_seconds,
            self.config.flood.window_seconds,
        ))
    }

    /// Drops all transient state for a disconnected player.
    pub fn forget_player(&self, player: Uuid) {
        if let Ok(mut history) = self.history.lock() {
            history.remove(&player);
        }
        if let Ok(mut last) = self.last_message.lock() {
            last.remove(&player);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BlacklistConfig, CapsConfig, FloodConfig, IpConfig, LinkConfig, SlowmodeConfig, SpamConfig,
    };

    fn quiet_config() -> FilterConfig {
        // Every check disabled; tests switch on the one under test.
        FilterConfig {
            spam: SpamConfig {
                enabled: false,
                max_messages: 3,
                window_seconds: 10,
            },
            flood: FloodConfig {
                enabled: false,
                max_messages: 5,
                window_seconds: 10,
            },
            links: LinkConfig {
                enabled: false,
                whitelist: vec![],
                action: LinkAction::Block,
            },
            ip: IpConfig {
                enabled: false,
                whitelist: vec![],
            },
            caps: CapsConfig {
                enabled: false,
                min_length: 6,
                max_percentage: 70.0,
                action: CapsAction::Lowercase,
            },
            slowmode: SlowmodeConfig {
                enabled: false,
                interval_seconds: 3,
            },
            blacklist: BlacklistConfig {
                enabled: false,
                words: vec![],
            },
        }
    }

    #[test]
    fn spam_rejects_repeats_within_window() {
        let mut config = quiet_config();
        config.spam.enabled = true;
        config.spam.max_messages = 2;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(filter.check(player, "buy gold"), FilterVerdict::Allow);
        assert_eq!(filter.check(player, "Buy   GOLD"), FilterVerdict::Allow);
        let verdict = filter.check(player, "buy gold");
        assert!(matches!(
            verdict,
            FilterVerdict::Deny {
                kind: FilterKind::Spam,
                ..
            }
        ));
    }

    #[test]
    fn spam_counts_are_per_player() {
        let mut config = quiet_config();
        config.spam.enabled = true;
        config.spam.max_messages = 1;
        let filter = PreFilter::new(config);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert_eq!(filter.check(first, "hello"), FilterVerdict::Allow);
        assert!(filter.check(first, "hello").is_deny());
        assert_eq!(filter.check(second, "hello"), FilterVerdict::Allow);
    }

    #[test]
    fn flood_counts_all_messages_including_rejected() {
        let mut config = quiet_config();
        config.flood.enabled = true;
        config.flood.max_messages = 2;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(filter.check(player, "one"), FilterVerdict::Allow);
        assert_eq!(filter.check(player, "two"), FilterVerdict::Allow);
        assert!(filter.check(player, "three").is_deny());
        // The rejected message was still recorded, so the player stays
        // over the limit.
        assert!(filter.check(player, "four").is_deny());
    }

    #[test]
    fn link_whitelist_allows() {
        let mut config = quiet_config();
        config.links.enabled = true;
        config.links.whitelist = vec!["youtube.com".to_string()];
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(
            filter.check(player, "watch https://youtube.com/abc"),
            FilterVerdict::Allow
        );
        assert!(filter.check(player, "visit scam-site.biz now").is_deny());
    }

    #[test]
    fn link_action_allow_passes_through() {
        let mut config = quiet_config();
        config.links.enabled = true;
        config.links.action = LinkAction::Allow;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(
            filter.check(player, "visit scam-site.biz now"),
            FilterVerdict::Allow
        );
    }

    #[test]
    fn ip_filter_catches_comma_obfuscation() {
        let mut config = quiet_config();
        config.ip.enabled = true;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert!(filter.check(player, "join 192.168.1.50:25565").is_deny());
        assert!(filter.check(player, "join 192,168,1,50").is_deny());
        assert_eq!(filter.check(player, "join my server"), FilterVerdict::Allow);
    }

    #[test]
    fn ip_whitelist_allows() {
        let mut config = quiet_config();
        config.ip.enabled = true;
        config.ip.whitelist = vec!["10.0.0.1".to_string()];
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(
            filter.check(player, "official server: 10.0.0.1"),
            FilterVerdict::Allow
        );
    }

    #[test]
    fn caps_rewrites_to_lowercase() {
        let mut config = quiet_config();
        config.caps.enabled = true;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(
            filter.check(player, "STOP SHOUTING"),
            FilterVerdict::Rewrite("stop shouting".to_string())
        );
        // Below the minimum length the check does not apply.
        assert_eq!(filter.check(player, "HI!"), FilterVerdict::Allow);
        // Mixed case under the percentage passes.
        assert_eq!(
            filter.check(player, "Normal Sentence Here"),
            FilterVerdict::Allow
        );
    }

    #[test]
    fn caps_block_action_denies() {
        let mut config = quiet_config();
        config.caps.enabled = true;
        config.caps.action = CapsAction::Block;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        let verdict = filter.check(player, "STOP SHOUTING");
        assert!(matches!(
            verdict,
            FilterVerdict::Deny {
                kind: FilterKind::Caps,
                ..
            }
        ));
    }

    #[test]
    fn slowmode_enforces_interval() {
        let mut config = quiet_config();
        config.slowmode.enabled = true;
        config.slowmode.interval_seconds = 60;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(filter.check(player, "first"), FilterVerdict::Allow);
        let verdict = filter.check(player, "second");
        assert!(matches!(
            verdict,
            FilterVerdict::Deny {
                kind: FilterKind::Slowmode,
                ..
            }
        ));
    }

    #[test]
    fn forget_player_clears_history() {
        let mut config = quiet_config();
        config.spam.enabled = true;
        config.spam.max_messages = 1;
        let filter = PreFilter::new(config);
        let player = Uuid::new_v4();

        assert_eq!(filter.check(player, "hello"), FilterVerdict::Allow);
        assert!(filter.check(player, "hello").is_deny());
        filter.forget_player(player);
        assert_eq!(filter.check(player, "hello"), FilterVerdict::Allow);
    }
}
