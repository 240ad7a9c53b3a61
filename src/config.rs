use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Top-level configuration, loaded from a single YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for the moderation pipeline. Mute enforcement stays
    /// active even when this is off.
    pub enabled: bool,
    pub api: ApiConfig,
    pub circuit_breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub filters: FilterConfig,
    pub categories: CategoryConfig,
    pub punishments: PunishmentConfig,
    pub appeals: AppealConfig,
    pub database: DatabaseConfig,
    pub decay: DecayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Global classification threshold, also the fallback when a category
    /// has no per-category threshold configured.
    pub threshold: f64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub spam: SpamConfig,
    pub flood: FloodConfig,
    pub links: LinkConfig,
    pub ip: IpConfig,
    pub caps: CapsConfig,
    pub slowmode: SlowmodeConfig,
    pub blacklist: BlacklistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    pub enabled: bool,
    /// Identical (normalized) messages within the window before rejection.
    pub max_messages: usize,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub enabled: bool,
    pub max_messages: usize,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAction {
    Block,
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub enabled: bool,
    pub whitelist: Vec<String>,
    pub action: LinkAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpConfig {
    pub enabled: bool,
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsAction {
    Lowercase,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsConfig {
    pub enabled: bool,
    pub min_length: usize,
    /// Percentage of uppercase letters (0-100) above which the action fires.
    pub max_percentage: f64,
    pub action: CapsAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowmodeConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub enabled: bool,
    pub words: Vec<String>,
}

/// How a classification result is mapped to the single category that is
/// escalated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Highest-scoring enabled category whose score meets its (or the
    /// global) threshold, independent of the service's flag bits.
    ScoreThreshold,
    /// Legacy behavior: requires the service to flag the message, then
    /// picks the highest-scoring flagged category that is enabled.
    EnabledFlagged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub enabled: Vec<String>,
    pub selection: SelectionPolicy,
    pub thresholds: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PunishmentConfig {
    /// Point threshold -> punishment spec string, e.g. `5: "MUTE:10m"`.
    pub escalation: BTreeMap<i64, String>,
    pub category_weights: HashMap<String, i64>,
    /// How often the background sweeper clears expired mutes.
    pub mute_sweep_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppealConfig {
    pub enabled: bool,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    pub check_minutes: u64,
    /// Ledgers idle for at least this long are eligible for decay.
    pub idle_hours: u64,
    pub amount: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            api: ApiConfig::default(),
            circuit_breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            filters: FilterConfig::default(),
            categories: CategoryConfig::default(),
            punishments: PunishmentConfig::default(),
            appeals: AppealConfig::default(),
            database: DatabaseConfig::default(),
            decay: DecayConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: String::new(),
            model: "text-moderation-latest".to_string(),
            threshold: 0.5,
            timeout_ms: 2000,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            enabled: true,
            failure_threshold: 5,
            reset_seconds: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: 1000,
            ttl_minutes: 10,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            spam: SpamConfig::default(),
            flood: FloodConfig::default(),
            links: LinkConfig::default(),
            ip: IpConfig::default(),
            caps: CapsConfig::default(),
            slowmode: SlowmodeConfig::default(),
            blacklist: BlacklistConfig::default(),
        }
    }
}

impl Default for SpamConfig {
    fn default() -> Self {
        SpamConfig {
            enabled: true,
            max_messages: 3,
            window_seconds: 10,
        }
    }
}

impl Default for FloodConfig {
    fn default() -> Self {
        FloodConfig {
            enabled: true,
            max_messages: 5,
            window_seconds: 3,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            enabled: true,
            whitelist: vec!["youtube.com".to_string(), "discord.com".to_string()],
            action: LinkAction::Block,
        }
    }
}

impl Default for IpConfig {
    fn default() -> Self {
        IpConfig {
            enabled: true,
            whitelist: Vec::new(),
        }
    }
}

impl Default for CapsConfig {
    fn default() -> Self {
        CapsConfig {
            enabled: true,
            min_length: 6,
            max_percentage: 70.0,
            action: CapsAction::Lowercase,
        }
    }
}

impl Default for SlowmodeConfig {
    fn default() -> Self {
        SlowmodeConfig {
            enabled: false,
            interval_seconds: 3,
        }
    }
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        BlacklistConfig {
            enabled: false,
            words: Vec::new(),
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        CategoryConfig {
            enabled: vec![
                "harassment".to_string(),
                "hate".to_string(),
                "sexual".to_string(),
                "violence".to_string(),
                "spam".to_string(),
            ],
            selection: SelectionPolicy::ScoreThreshold,
            thresholds: HashMap::new(),
        }
    }
}

impl Default for PunishmentConfig {
    fn default() -> Self {
        let mut escalation = BTreeMap::new();
        escalation.insert(0, "WARN".to_string());
        escalation.insert(5, "MUTE:10m".to_string());
        escalation.insert(10, "MUTE:1h".to_string());
        escalation.insert(20, "KICK".to_string());
        escalation.insert(30, "BAN:1d".to_string());
        PunishmentConfig {
            escalation,
            category_weights: HashMap::new(),
            mute_sweep_seconds: 30,
        }
    }
}

impl Default for AppealConfig {
    fn default() -> Self {
        AppealConfig {
            enabled: true,
            cooldown_seconds: 3600,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "chatguard.db".to_string(),
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig {
            enabled: true,
            check_minutes: 60,
            idle_hours: 24,
            amount: 1,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the parts that are compiled up front so a bad config fails
    /// at load instead of mid-pipeline.
    pub fn validate(&self) -> anyhow::Result<()> {
        crate::escalation::EscalationLadder::from_config(&self.punishments)?;
        if self.api.timeout_ms == 0 {
            anyhow::bail!("api.timeout_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.api.threshold) {
            anyhow::bail!("api.threshold must be within 0.0..=1.0");
        }
        for (category, threshold) in &self.categories.thresholds {
            if !(0.0..=1.0).contains(threshold) {
                anyhow::bail!("categories.thresholds.{category} must be within 0.0..=1.0");
            }
        }
        Ok(())
    }
}
