//! Roster, keyword tables and detector thresholds.
//!
//! Everything here can be overridden from a TOML file; every field has a
//! built-in default so a file only needs the parts it changes.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::Entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Declaration order is the matcher tie-break.
    pub entities: Vec<Entity>,
    /// Phrases removed from text before alias matching.
    pub denylist: Vec<String>,
    pub keywords: Keywords,
    pub trend: TrendThresholds,
    pub patterns: PatternThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entities: default_roster(),
            denylist: strings(&[
                "cursor position",
                "mouse cursor",
                "text cursor",
                "cursor movement",
                "cursor-pointer",
                "decline",
                "incline",
            ]),
            keywords: Keywords::default(),
            trend: TrendThresholds::default(),
            patterns: PatternThresholds::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&raw)?;
        info!(
            "Loaded configuration from {} ({} entities)",
            path.display(),
            config.entities.len()
        );
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entities.is_empty() {
            return Err(Error::Config("entity roster is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if entity.slug.trim().is_empty() {
                return Err(Error::Config(format!("entity '{}' has an empty slug", entity.name)));
            }
            if !seen.insert(entity.slug.as_str()) {
                return Err(Error::Config(format!("duplicate entity slug '{}'", entity.slug)));
            }
        }
        Ok(())
    }

    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.slug.as_str())
    }
}

/// Named keyword set; a text belongs to the bucket if it contains any keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordBucket {
    pub name: String,
    pub keywords: Vec<String>,
}

impl KeywordBucket {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: strings(keywords),
        }
    }

    /// `text` must already be lowercase.
    pub fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keywords {
    /// Regexes marking a funding headline as major.
    pub funding_major: Vec<String>,
    /// Any of these marks a headline as a minor funding story.
    pub funding: Vec<String>,
    /// Titles containing any of these raise a funding alert.
    pub funding_alert: Vec<String>,
    pub negative: Vec<String>,
    pub positive: Vec<String>,
    pub features: Vec<KeywordBucket>,
    pub themes: Vec<KeywordBucket>,
}

impl Default for Keywords {
    fn default() -> Self {
        Self {
            funding_major: strings(&[
                r"\$\d+(?:\.\d+)?\s?[MB]\b",
                r"(?i)\braises\b",
                r"(?i)\bacquisition\b",
            ]),
            funding: strings(&[
                "funding",
                "raised",
                "series",
                "valuation",
                "investment",
                "investors",
                "acquired",
                "ipo",
            ]),
            funding_alert: strings(&[
                "funding",
                "raised",
                "series",
                "valuation",
                "acquired",
                "acquisition",
                "ipo",
            ]),
            negative: strings(&[
                "problem", "issue", "wrong", "fail", "bad", "terrible", "broken", "bug",
            ]),
            positive: strings(&[
                "great", "awesome", "amazing", "love", "best", "excellent", "fantastic",
            ]),
            features: vec![
                KeywordBucket::new("agent", &["agent", "agentic", "autonomous"]),
                KeywordBucket::new("chat", &["chat", "conversation", "assistant panel"]),
                KeywordBucket::new(
                    "multimodel",
                    &["multi-model", "multimodel", "model picker", "bring your own model", "byok"],
                ),
                KeywordBucket::new(
                    "collaboration",
                    &["collaboration", "collaborative", "team", "share", "multiplayer"],
                ),
            ],
            themes: vec![
                KeywordBucket::new("agent", &["agent", "autonomous", "agentic"]),
                KeywordBucket::new("safety", &["safety", "ethics", "ethical", "alignment"]),
                KeywordBucket::new("local", &["local", "privacy", "offline", "self-host"]),
                KeywordBucket::new("enterprise", &["enterprise", "soc 2", "soc2", "compliance"]),
                KeywordBucket::new("open-source", &["open source", "open-source", "oss"]),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendThresholds {
    pub hiring_surge_delta: i64,
    pub hiring_high_delta: i64,
    pub hiring_surge_percent: f64,
    pub hiring_surge_min_count: i64,
    pub hiring_drop_delta: i64,
    pub hiring_drop_percent: f64,
    pub hiring_drop_min_previous: i64,
    /// Install base above which the large per-day threshold applies.
    pub install_large_base: i64,
    pub install_large_daily: i64,
    pub install_small_daily: i64,
    pub rank_shift: usize,
    pub rank_shift_high: usize,
    pub pricing_window_hours: i64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            hiring_surge_delta: 10,
            hiring_high_delta: 20,
            hiring_surge_percent: 50.0,
            hiring_surge_min_count: 5,
            hiring_drop_delta: 10,
            hiring_drop_percent: 30.0,
            hiring_drop_min_previous: 10,
            install_large_base: 1_000_000,
            install_large_daily: 100_000,
            install_small_daily: 10_000,
            rank_shift: 3,
            rank_shift_high: 5,
            pricing_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternThresholds {
    pub expansion_min_hiring: i64,
    pub release_window_days: i64,
    /// Absolute weekly install growth that counts as a spike.
    pub install_spike: i64,
    pub pricing_window_days: i64,
    pub pricing_min_entities: usize,
    pub convergence_window_days: i64,
    pub convergence_min_entities: usize,
    pub rank_shift: usize,
    pub market_shift_min_movers: usize,
    pub top_themes: usize,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            expansion_min_hiring: 10,
            release_window_days: 7,
            install_spike: 10_000,
            pricing_window_days: 30,
            pricing_min_entities: 3,
            convergence_window_days: 30,
            convergence_min_entities: 2,
            rank_shift: 3,
            market_shift_min_movers: 2,
            top_themes: 3,
        }
    }
}

fn default_roster() -> Vec<Entity> {
    vec![
        Entity::new("cursor", "Cursor", &["cursor", "anysphere"]),
        Entity::new("windsurf", "Windsurf", &["windsurf", "codeium"]),
        Entity::new("github-copilot", "GitHub Copilot", &["github copilot", "copilot"]),
        Entity::new("cline", "Cline", &["cline"]),
        Entity::new("continue", "Continue", &["continue.dev", "continuedev"]),
        Entity::new("tabnine", "Tabnine", &["tabnine"]),
        Entity::new("cody", "Sourcegraph Cody", &["sourcegraph", "cody ai", "sourcegraph cody"]),
        Entity::new("replit", "Replit", &["replit"]),
        Entity::new("aider", "Aider", &["aider"]),
        Entity::new("zed", "Zed", &["zed editor", "zed industries", "zed.dev"]),
    ]
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slugs().next(), Some("cursor"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            [[entities]]
            slug = "acme"
            name = "Acme"
            aliases = ["acme"]

            [trend]
            rank_shift = 4
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert_eq!(config.entities.len(), 1);
        assert_eq!(config.trend.rank_shift, 4);
        assert_eq!(config.trend.hiring_surge_delta, 10);
        assert_eq!(config.patterns.top_themes, 3);
        assert!(!config.keywords.negative.is_empty());
    }

    #[test]
    fn rejects_duplicate_slugs() {
        let raw = r#"
            [[entities]]
            slug = "acme"
            name = "Acme"

            [[entities]]
            slug = "acme"
            name = "Acme Two"
        "#;
        let err = Config::from_toml(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate entity slug"));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(Config::from_toml("entities = 3"), Err(Error::Config(_))));
    }

    #[test]
    fn bucket_matches_any_keyword() {
        let bucket = KeywordBucket::new("agent", &["agent", "autonomous"]);
        assert!(bucket.matches("new autonomous mode"));
        assert!(!bucket.matches("faster tab completion"));
    }
}
