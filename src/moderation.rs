//! The moderation pipeline: mute gate, pre-filters, blacklist, cached
//! classification, asynchronous escalation.
//!
//! `process_chat` answers quickly for the sender; the classification call
//! runs on its own task so one slow or dead external service never holds
//! up chat. Its result is cached even if the sender has since left.

use crate::appeals::AppealService;
use crate::cache::MessageCache;
use crate::classifier::ClassifierClient;
use crate::config::Config;
use crate::decay::{spawn_mute_sweeper, spawn_point_decay};
use crate::escalation::{select_violation, EscalationEngine};
use crate::gateway::ChatGateway;
use crate::mutes::MuteRegistry;
use crate::prefilter::{FilterVerdict, PreFilter};
use crate::punishment::PunishmentExecutor;
use crate::stats::{ModerationStats, StatsSnapshot};
use crate::store::{Database, StoreWriter};
use crate::text::{fold_obfuscation, format_duration_minutes};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Outcome of one pipeline pass, from the sender's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Deliver,
    /// Deliver with the text replaced (caps-lock rewrite).
    DeliverRewritten(String),
    /// Do not deliver; the reason has already been sent to the player.
    Suppress { reason: String },
}

impl Disposition {
    pub fn delivered(&self) -> bool {
        !matches!(self, Disposition::Suppress { .. })
    }
}

pub struct ModerationService {
    config: Config,
    db: Arc<Database>,
    prefilter: PreFilter,
    cache: Arc<MessageCache>,
    classifier: Arc<ClassifierClient>,
    engine: Arc<EscalationEngine>,
    registry: Arc<MuteRegistry>,
    executor: Arc<PunishmentExecutor>,
    appeals: AppealService,
    gateway: Arc<dyn ChatGateway>,
    stats: Arc<ModerationStats>,
}

impl ModerationService {
    /// Builds the full pipeline. Must run inside a tokio runtime because it
    /// spawns the durable-store writer task. The mute index is rebuilt from
    /// the store before this returns.
    pub fn new(config: Config, gateway: Arc<dyn ChatGateway>) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let db = Arc::new(Database::open(&config.database.path)?);
        Self::with_database(config, gateway, db)
    }

    /// Same as [`ModerationService::new`] but over an existing database,
    /// which the demo CLI and tests use with an in-memory store.
    pub fn with_database(
        config: Config,
        gateway: Arc<dyn ChatGateway>,
        db: Arc<Database>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let stats = Arc::new(ModerationStats::default());
        let writer = StoreWriter::spawn(db.clone());
        let registry = Arc::new(MuteRegistry::new(writer.clone()));
        let restored = registry.load_from(&db)?;
        if restored > 0 {
            log::info!("restored {restored} active mutes from the store");
        }

        let executor = Arc::new(PunishmentExecutor::new(
            registry.clone(),
            writer.clone(),
            gateway.clone(),
            stats.clone(),
        ));
        let engine = Arc::new(EscalationEngine::new(
            db.clone(),
            writer.clone(),
            &config.punishments,
            executor.clone(),
            stats.clone(),
        )?);
        let appeals = AppealService::new(db.clone(), executor.clone(), &config.appeals);
        let classifier = Arc::new(ClassifierClient::new(&config.api, &config.circuit_breaker)?);
        let cache = Arc::new(MessageCache::new(
            config.cache.enabled,
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_minutes * 60),
        ));
        let prefilter = PreFilter::new(config.filters.clone());

        Ok(Arc::new(ModerationService {
            config,
            db,
            prefilter,
            cache,
            classifier,
            engine,
            registry,
            executor,
            appeals,
            gateway,
            stats,
        }))
    }

    /// Spawns the decay and mute-sweep tasks. Call once after construction;
    /// the handles can be aborted at shutdown.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if self.config.decay.enabled {
            handles.push(spawn_point_decay(self.db.clone(), self.config.decay.clone()));
        }
        handles.push(spawn_mute_sweeper(
            self.registry.clone(),
            self.gateway.clone(),
            Duration::from_secs(self.config.punishments.mute_sweep_seconds),
        ));
        handles
    }

    /// Runs one chat message through the pipeline and returns what the
    /// messaging layer should do with it. Classification, when needed,
    /// continues on a spawned task after this returns.
    pub async fn process_chat(
        &self,
        player: Uuid,
        player_name: &str,
        message: &str,
    ) -> Disposition {
        if self.registry.is_muted(player) {
            let remaining = self
                .registry
                .expiry(player)
                .and_then(|expiry| expiry.remaining_minutes(chrono::Utc::now()))
                .map(format_duration_minutes)
                .unwrap_or_else(|| "permanent".to_string());
            self.gateway
                .notify_player(player, &format!("You are muted ({remaining} remaining)."));
            return Disposition::Suppress {
                reason: "muted".to_string(),
            };
        }

        if !self.config.enabled {
            return Disposition::Deliver;
        }
        self.stats.record_message();

        let mut text = message.to_string();
        let mut rewritten = false;
        match self.prefilter.check(player, message) {
            FilterVerdict::Allow => {}
            FilterVerdict::Rewrite(replacement) => {
                text = replacement;
                rewritten = true;
            }
            FilterVerdict::Deny { kind, reason } => {
                log::debug!("{player_name} blocked by {kind} filter");
                self.stats.record_filtered();
                self.gateway.notify_player(player, &reason);
                return Disposition::Suppress {
                    reason: format!("{kind} filter"),
                };
            }
        }

        if let Some(word) = self.matched_blacklist_word(&text) {
            self.stats.record_blacklisted();
            self.gateway
                .notify_player(player, "Your message was blocked.");
            self.spawn_escalation(player, player_name, "blacklist".to_string(), 1.0, text);
            log::debug!("{player_name} matched blacklisted word {word:?}");
            return Disposition::Suppress {
                reason: "blacklist".to_string(),
            };
        }

        if let Some(cached) = self.cache.get(&text) {
            if cached.flagged {
                self.gateway
                    .notify_player(player, "Your message was blocked.");
                self.spawn_escalation(player, player_name, cached.category, cached.score, text);
                return Disposition::Suppress {
                    reason: "flagged".to_string(),
                };
            }
            return self.deliver(text, rewritten);
        }

        // Cache miss: deliver now, classify on the side. A flagged result
        // escalates after the fact rather than stalling chat.
        self.spawn_classification(player, player_name, text.clone());
        self.deliver(text, rewritten)
    }

    fn deliver(&self, text: String, rewritten: bool) -> Disposition {
        if rewritten {
            Disposition::DeliverRewritten(text)
        } else {
            Disposition::Deliver
        }
    }

    fn matched_blacklist_word(&self, text: &str) -> Option<String> {
        if !self.config.filters.blacklist.enabled {
            return None;
        }
        let folded = fold_obfuscation(text);
        self.config
            .filters
            .blacklist
            .words
            .iter()
            .find(|word| folded.contains(&fold_obfuscation(word)))
            .cloned()
    }

    fn spawn_escalation(
        &self,
        player: Uuid,
        player_name: &str,
        category: String,
        score: f64,
        message: String,
    ) {
        let engine = self.engine.clone();
        let name = player_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine
                .handle_violation(player, &name, &category, score, &message)
                .await
            {
                log::error!("failed to handle violation for {name}: {e}");
            }
        });
    }

    /// Starts the post-delivery half of a cache miss. A completed result is
    /// always cached; the sender being gone only skips their side effects.
    fn spawn_classification(&self, player: Uuid, player_name: &str, text: String) {
        let classifier = self.classifier.clone();
        let cache = self.cache.clone();
        let stats = self.stats.clone();
        let engine = self.engine.clone();
        let categories = self.config.categories.clone();
        let global_threshold = self.config.api.threshold;
        let name = player_name.to_string();

        tokio::spawn(async move {
            let result = match classifier.classify(&text).await {
                Some(result) => {
                    stats.record_api_call(true);
                    result
                }
                None => {
                    stats.record_api_call(false);
                    return;
                }
            };

            if let Some(error) = &result.error {
                log::warn!("classification result carries an error: {error}");
                return;
            }

            cache.put(&text, &result);

            if let Some((category, score)) = select_violation(&result, &categories, global_threshold)
            {
                if let Err(e) = engine
                    .handle_violation(player, &name, &category, score, &text)
                    .await
                {
                    log::error!("failed to handle violation for {name}: {e}");
                }
            }
        });
    }

    /// Connection-time ban gate. Answered from the durable store; this is
    /// not a per-message path.
    pub async fn is_banned(&self, player: Uuid) -> bool {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.has_active_ban(player)).await {
            Ok(Ok(banned)) => banned,
            Ok(Err(e)) => {
                log::error!("ban check failed: {e}");
                false
            }
            Err(e) => {
                log::error!("ban check task died: {e}");
                false
            }
        }
    }

    pub fn is_muted(&self, player: Uuid) -> bool {
        self.registry.is_muted(player)
    }

    /// Drops per-player transient state when they disconnect. In-flight
    /// classification for their messages is left to finish and cache.
    pub fn forget_player(&self, player: Uuid) {
        self.prefilter.forget_player(player);
    }

    pub fn appeals(&self) -> &AppealService {
        &self.appeals
    }

    pub fn executor(&self) -> &PunishmentExecutor {
        &self.executor
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn classifier_available(&self) -> bool {
        self.classifier.is_available()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_counts(&self) -> (u64, u64) {
        (self.cache.hits(), self.cache.misses())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ModerationResult;
    use crate::gateway::testing::RecordingGateway;
    use std::collections::HashMap;

    fn test_config() -> Config {
        let mut config = Config::default();
        // Point the client somewhere unroutable with a short timeout so
        // cache-miss classification resolves quickly as unavailable.
        config.api.base_url = "http://127.0.0.1:9".to_string();
        config.api.timeout_ms = 100;
        config.database.path = ":memory:".to_string();
        config.filters.slowmode.enabled = false;
        config
    }

    async fn service(
        config: Config,
        online: &[Uuid],
    ) -> (Arc<ModerationService>, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::with_online(online));
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service =
            ModerationService::with_database(config, gateway.clone(), db).unwrap();
        (service, gateway)
    }

    fn flagged_result(category: &str, score: f64) -> ModerationResult {
        ModerationResult {
            flagged: true,
            categories: HashMap::from([(category.to_string(), true)]),
            category_scores: HashMap::from([(category.to_string(), score)]),
            error: None,
        }
    }

    #[tokio::test]
    async fn clean_message_is_delivered() {
        let player = Uuid::new_v4();
        let (service, _gateway) = service(test_config(), &[player]).await;
        let disposition = service.process_chat(player, "alice", "hello there").await;
        assert_eq!(disposition, Disposition::Deliver);
    }

    #[tokio::test]
    async fn muted_player_is_suppressed() {
        let player = Uuid::new_v4();
        let (service, gateway) = service(test_config(), &[player]).await;
        service.executor().mute(player, "alice", "spam", 10, None);

        let disposition = service.process_chat(player, "alice", "hello").await;
        assert!(matches!(disposition, Disposition::Suppress { .. }));
        let notices = gateway.notices.lock().unwrap();
        assert!(notices.iter().any(|(_, text)| text.contains("muted")));
    }

    #[tokio::test]
    async fn filter_rejection_suppresses_and_notifies() {
        let player = Uuid::new_v4();
        let mut config = test_config();
        config.filters.ip.enabled = true;
        // The URL pattern also matches dotted quads; switch the link check
        // off so this exercises the IP filter specifically.
        config.filters.links.enabled = false;
        let (service, gateway) = service(config, &[player]).await;

        let disposition = service
            .process_chat(player, "bob", "join 10.20.30.40 now")
            .await;
        assert_eq!(
            disposition,
            Disposition::Suppress {
                reason: "ip filter".to_string()
            }
        );
        assert!(!gateway.notices.lock().unwrap().is_empty());
        assert_eq!(service.stats().filtered, 1);
    }

    #[tokio::test]
    async fn caps_rewrite_is_returned_to_caller() {
        let player = Uuid::new_v4();
        let (service, _gateway) = service(test_config(), &[player]).await;

        let disposition = service
            .process_chat(player, "carol", "STOP SHOUTING PLEASE")
            .await;
        assert_eq!(
            disposition,
            Disposition::DeliverRewritten("stop shouting please".to_string())
        );
    }

    #[tokio::test]
    async fn blacklisted_word_is_blocked_despite_obfuscation() {
        let player = Uuid::new_v4();
        let mut config = test_config();
        config.filters.blacklist.enabled = true;
        config.filters.blacklist.words = vec!["badword".to_string()];
        let (service, _gateway) = service(config, &[player]).await;

        let disposition = service.process_chat(player, "dave", "you b4dw0rd").await;
        assert_eq!(
            disposition,
            Disposition::Suppress {
                reason: "blacklist".to_string()
            }
        );

        // The spawned escalation lands in the ledger.
        let db = service.database().clone();
        for _ in 0..100 {
            if db.violation_points(player).unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(db.violation_points(player).unwrap() > 0);
    }

    #[tokio::test]
    async fn cached_flagged_result_blocks_without_network() {
        let player = Uuid::new_v4();
        let mut config = test_config();
        // One point is enough to mute instantly.
        config.punishments.escalation.clear();
        config
            .punishments
            .escalation
            .insert(1, "MUTE:10m".to_string());
        let (service, _gateway) = service(config, &[player]).await;

        service
            .cache
            .put("buy cheap gold", &flagged_result("spam", 0.97));

        let disposition = service
            .process_chat(player, "erin", "BUY  CHEAP   GOLD")
            .await;
        assert_eq!(
            disposition,
            Disposition::Suppress {
                reason: "flagged".to_string()
            }
        );

        for _ in 0..100 {
            if service.is_muted(player) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.is_muted(player));
    }

    #[tokio::test]
    async fn cached_safe_result_delivers() {
        let player = Uuid::new_v4();
        let (service, _gateway) = service(test_config(), &[player]).await;

        service.cache.put(
            "good morning",
            &ModerationResult {
                flagged: false,
                categories: HashMap::new(),
                category_scores: HashMap::from([("spam".to_string(), 0.01)]),
                error: None,
            },
        );

        let disposition = service.process_chat(player, "frank", "good morning").await;
        assert_eq!(disposition, Disposition::Deliver);
        let (hits, _) = service.cache_counts();
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn unavailable_classifier_never_blocks_delivery() {
        let player = Uuid::new_v4();
        let (service, _gateway) = service(test_config(), &[player]).await;

        let disposition = service
            .process_chat(player, "gil", "novel message nobody cached")
            .await;
        assert_eq!(disposition, Disposition::Deliver);

        // The spawned call fails against the unroutable endpoint and is
        // recorded as an API failure, not a violation.
        for _ in 0..100 {
            if service.stats().api_failures > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.stats().api_failures, 1);
        assert_eq!(service.stats().violations, 0);
    }

    #[tokio::test]
    async fn disabled_pipeline_only_enforces_mutes() {
        let player = Uuid::new_v4();
        let mut config = test_config();
        config.enabled = false;
        config.filters.ip.enabled = true;
        let (service, _gateway) = service(config, &[player]).await;

        let disposition = service
            .process_chat(player, "hana", "join 10.20.30.40")
            .await;
        assert_eq!(disposition, Disposition::Deliver);

        service.executor().mute(player, "hana", "spam", 10, None);
        let disposition = service.process_chat(player, "hana", "hello").await;
        assert!(matches!(disposition, Disposition::Suppress { .. }));
    }

    #[tokio::test]
    async fn ban_gate_reads_durable_store() {
        let player = Uuid::new_v4();
        let (service, _gateway) = service(test_config(), &[player]).await;
        assert!(!service.is_banned(player).await);

        service
            .database()
            .add_punishment(player, "ivan", "ban", "hate", -1, None)
            .unwrap();
        assert!(service.is_banned(player).await);
    }
}
