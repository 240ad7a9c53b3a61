//! Escalation: category selection, point accrual and punishment choice.
//!
//! The ladder maps accumulated violation points to the tightest-fitting
//! punishment tier: among all thresholds at or below the balance, the
//! greatest one wins.

use crate::classifier::ModerationResult;
use crate::config::{CategoryConfig, PunishmentConfig, SelectionPolicy};
use crate::punishment::{PunishmentExecutor, PunishmentKind, PunishmentSpec};
use crate::stats::ModerationStats;
use crate::store::{Database, StoreOp, StoreWriter};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationRule {
    pub threshold: i64,
    pub punishment: PunishmentSpec,
}

/// The compiled escalation table, sorted by ascending threshold.
#[derive(Debug, Clone)]
pub struct EscalationLadder {
    rules: Vec<EscalationRule>,
}

impl EscalationLadder {
    pub fn from_config(config: &PunishmentConfig) -> anyhow::Result<Self> {
        let mut rules = Vec::with_capacity(config.escalation.len());
        for (&threshold, spec) in &config.escalation {
            let punishment = PunishmentSpec::parse(spec).map_err(|e| {
                anyhow::anyhow!("escalation rule at {threshold} points is invalid: {e}")
            })?;
            rules.push(EscalationRule {
                threshold,
                punishment,
            });
        }
        // BTreeMap iteration is already ascending; keep the invariant local.
        rules.sort_by_key(|rule| rule.threshold);
        Ok(EscalationLadder { rules })
    }

    /// Greatest threshold at or below the balance, if any.
    pub fn select(&self, points: i64) -> Option<&EscalationRule> {
        self.rules
            .iter()
            .take_while(|rule| rule.threshold <= points)
            .last()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Maps a classification result to the single (category, score) pair the
/// escalation engine acts on, or `None` when nothing qualifies.
pub fn select_violation(
    result: &ModerationResult,
    categories: &CategoryConfig,
    global_threshold: f64,
) -> Option<(String, f64)> {
    match categories.selection {
        SelectionPolicy::EnabledFlagged => {
            if !result.flagged {
                return None;
            }
            categories
                .enabled
                .iter()
                .filter(|category| result.categories.get(*category).copied().unwrap_or(false))
                .map(|category| (category.clone(), result.score_for(category)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
        }
        SelectionPolicy::ScoreThreshold => categories
            .enabled
            .iter()
            .filter_map(|category| {
                let score = *result.category_scores.get(category)?;
                let threshold = categories
                    .thresholds
                    .get(category)
                    .copied()
                    .unwrap_or(global_threshold);
                (score >= threshold).then(|| (category.clone(), score))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1)),
    }
}

pub struct EscalationEngine {
    db: Arc<Database>,
    writer: StoreWriter,
    ladder: EscalationLadder,
    weights: HashMap<String, i64>,
    executor: Arc<PunishmentExecutor>,
    stats: Arc<ModerationStats>,
}

impl EscalationEngine {
    pub fn new(
        db: Arc<Database>,
        writer: StoreWriter,
        config: &PunishmentConfig,
        executor: Arc<PunishmentExecutor>,
        stats: Arc<ModerationStats>,
    ) -> anyhow::Result<Self> {
        Ok(EscalationEngine {
            db,
            writer,
            ladder: EscalationLadder::from_config(config)?,
            weights: config.category_weights.clone(),
            executor,
            stats,
        })
    }

    fn weight_for(&self, category: &str) -> i64 {
        self.weights.get(category).copied().unwrap_or(1)
    }

    /// Records one qualifying violation and punishes according to the
    /// player's new point balance. Returns the executed punishment kind.
    pub async fn handle_violation(
        &self,
        player: Uuid,
        player_name: &str,
        category: &str,
        score: f64,
        message: &str,
    ) -> anyhow::Result<Option<PunishmentKind>> {
        self.stats.record_violation();
        let weight = self.weight_for(category);

        let db = self.db.clone();
        let name = player_name.to_string();
        let cat = category.to_string();
        let text = message.to_string();
        let (violation_id, points) = tokio::task::spawn_blocking(move || {
            db.add_violation_points(player, &name, weight)?;
            let violation_id = db.log_violation(player, &name, &text, &cat, score)?;
            let points = db.violation_points(player)?;
            Ok::<_, anyhow::Error>((violation_id, points))
        })
        .await??;

        let selected = self.ladder.select(points).cloned();
        let action = match &selected {
            Some(rule) => {
                log::info!(
                    "{player_name} reached {points} points, applying {}",
                    rule.punishment
                );
                let reason = format!("{category} ({score:.2})");
                self.executor.execute(
                    player,
                    player_name,
                    &rule.punishment,
                    &reason,
                    Some(message),
                );
                rule.punishment.kind.as_str()
            }
            None => "none",
        };

        self.writer.submit(StoreOp::UpdateViolationAction {
            violation_id,
            action: action.to_string(),
        });

        Ok(selected.map(|rule| rule.punishment.kind))
    }
}
