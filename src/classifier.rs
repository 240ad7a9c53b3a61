//! Client for the external text-classification service.
//!
//! `classify` never surfaces transport problems to the caller: every
//! failure mode (connect error, timeout, non-2xx status, unparseable body)
//! feeds the circuit breaker and comes back as `None`, which readers must
//! treat as "unavailable", not "safe".

use crate::breaker::CircuitBreaker;
use crate::config::{ApiConfig, BreakerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
    model: &'a str,
    threshold: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub results: Vec<ModerationResult>,
    #[serde(default)]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationResult {
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub categories: HashMap<String, bool>,
    #[serde(default)]
    pub category_scores: HashMap<String, f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ModerationResult {
    /// Category with the highest score, `("unknown", 0.0)` when the service
    /// returned no scores at all.
    pub fn highest_category(&self) -> (String, f64) {
        self.category_scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(category, score)| (category.clone(), *score))
            .unwrap_or_else(|| ("unknown".to_string(), 0.0))
    }

    pub fn flagged_categories(&self) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|(_, &flagged)| flagged)
            .map(|(category, _)| category.as_str())
            .collect()
    }

    pub fn score_for(&self, category: &str) -> f64 {
        self.category_scores.get(category).copied().unwrap_or(0.0)
    }
}

pub struct ClassifierClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    threshold: f64,
    breaker: CircuitBreaker,
}

impl ClassifierClient {
    pub fn new(api: &ApiConfig, breaker: &BreakerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(api.timeout_ms))
            .connect_timeout(Duration::from_millis(api.timeout_ms))
            .build()?;

        Ok(ClassifierClient {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api.api_key.clone(),
            model: api.model.clone(),
            threshold: api.threshold,
            breaker: CircuitBreaker::new(breaker),
        })
    }

    /// Whether a call made right now would be attempted at all.
    pub fn is_available(&self) -> bool {
        !self.breaker.check_open()
    }

    /// Classifies one message. `None` means the service was unavailable
    /// (breaker open, transport failure, bad status or unparseable body).
    pub async fn classify(&self, text: &str) -> Option<ModerationResult> {
        if self.breaker.check_open() {
            log::debug!("circuit breaker open, skipping classification call");
            return None;
        }

        let request = ModerationRequest {
            input: text,
            model: &self.model,
            threshold: self.threshold,
        };
        let url = format!("{}/moderations", self.base_url);

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("classification request failed: {e}");
                self.breaker.record_failure();
                return None;
            }
        };

        if !response.status().is_success() {
            log::warn!("classification API returned status {}", response.status());
            self.breaker.record_failure();
            return None;
        }

        match response.json::<ModerationResponse>().await {
            Ok(parsed) => {
                self.breaker.record_success();
                if let Some(warning) = &parsed.warning {
                    log::warn!("classification API warning: {warning}");
                }
                parsed.results.into_iter().next()
            }
            Err(e) => {
                log::warn!("unparseable classification response: {e}");
                self.breaker.record_failure();
                None
            }
        }
    }

    pub fn breaker_failures(&self) -> u32 {
        self.breaker.failure_count()
    }
}
