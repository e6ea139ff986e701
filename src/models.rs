use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One tracked competitor product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Entity {
    pub fn new(slug: &str, name: &str, aliases: &[&str]) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Closed set of signal categories. Declaration order is the scoring
/// evaluation order, which fixes the order of explanation strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Funding,
    Hiring,
    MarketplaceInstall,
    News,
    Social,
    Changelog,
    CommunitySize,
    Pricing,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Funding,
        Category::Hiring,
        Category::MarketplaceInstall,
        Category::News,
        Category::Social,
        Category::Changelog,
        Category::CommunitySize,
        Category::Pricing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Funding => "funding",
            Category::Hiring => "hiring",
            Category::MarketplaceInstall => "marketplace-install",
            Category::News => "news",
            Category::Social => "social",
            Category::Changelog => "changelog",
            Category::CommunitySize => "community-size",
            Category::Pricing => "pricing",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension marketplace an install figure was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Marketplace {
    #[default]
    #[serde(alias = "vs-code")]
    Vscode,
    #[serde(alias = "chrome")]
    Browser,
}

/// Canonical record every source adapter emits.
///
/// `magnitude` stays loosely typed until scoring so that a malformed value
/// skips a single contribution instead of failing the whole load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    #[serde(default)]
    pub entity: Option<String>,
    pub category: Category,
    pub raw_text: String,
    #[serde(default)]
    pub magnitude: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<Marketplace>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SignalRecord {
    pub fn new(category: Category, raw_text: impl Into<String>) -> Self {
        Self {
            entity: None,
            category,
            raw_text: raw_text.into(),
            magnitude: None,
            marketplace: None,
            timestamp: None,
        }
    }

    pub fn with_entity(mut self, slug: impl Into<String>) -> Self {
        self.entity = Some(slug.into());
        self
    }

    pub fn with_magnitude(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.magnitude = Some(value.into());
        self
    }

    pub fn with_marketplace(mut self, marketplace: Marketplace) -> Self {
        self.marketplace = Some(marketplace);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Numeric magnitude, accepting JSON numbers and numeric strings.
    pub fn numeric_magnitude(&self) -> Result<f64, SkipReason> {
        let value = match &self.magnitude {
            None | Some(serde_json::Value::Null) => return Err(SkipReason::MissingMagnitude),
            Some(value) => value,
        };
        let parsed = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(SkipReason::MalformedMagnitude),
        }
    }
}

/// Why a record contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnresolvedEntity,
    MissingMagnitude,
    MalformedMagnitude,
    MissingTimestamp,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::UnresolvedEntity => "no entity matched",
            SkipReason::MissingMagnitude => "magnitude missing",
            SkipReason::MalformedMagnitude => "magnitude is not numeric",
            SkipReason::MissingTimestamp => "timestamp missing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub category: Category,
    pub raw_text: String,
    pub reason: SkipReason,
}

/// Per-run scoring result. Keys are exactly the configured roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub scores: BTreeMap<String, i64>,
    pub signals: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub skipped: Vec<SkippedRecord>,
}

impl ScoreCard {
    /// Slugs ordered by descending score, ties broken by slug.
    pub fn ranked(&self) -> Vec<(&str, i64)> {
        let mut ranked: Vec<(&str, i64)> =
            self.scores.iter().map(|(slug, score)| (slug.as_str(), *score)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// One date's values in a historical series. For the momentum series
/// `scores` are momentum scores; for hiring and install series they are
/// the observed raw counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub scores: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signals: BTreeMap<String, Vec<String>>,
}

impl Snapshot {
    pub fn new(date: NaiveDate, scores: BTreeMap<String, i64>) -> Self {
        Self {
            date,
            scores,
            signals: BTreeMap::new(),
        }
    }

    pub fn from_card(date: NaiveDate, card: &ScoreCard) -> Self {
        Self {
            date,
            scores: card.scores.clone(),
            signals: card.signals.clone(),
        }
    }
}

/// Ordered so that sorting puts `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HiringSurge,
    HiringDrop,
    InstallSpike,
    MomentumSurge,
    MomentumDrop,
    PricingChange,
    FundingNews,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub entity: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Expansion,
    PricingActivity,
    FeatureConvergence,
    MarketShift,
    SentimentMismatch,
    Theme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<i64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Accepts RFC 3339 or a leading `YYYY-MM-DD` (taken as midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn deserialize_opt_timestamp<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(d)?;
    Ok(opt.as_deref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_sorts_high_first() {
        let mut severities = vec![Severity::Low, Severity::High, Severity::Medium];
        severities.sort();
        assert_eq!(severities, vec![Severity::High, Severity::Medium, Severity::Low]);
    }

    #[test]
    fn magnitude_accepts_numbers_and_numeric_strings() {
        let record = SignalRecord::new(Category::CommunitySize, "discord").with_magnitude(1200);
        assert_eq!(record.numeric_magnitude(), Ok(1200.0));

        let record = SignalRecord::new(Category::CommunitySize, "discord").with_magnitude("12,500");
        assert_eq!(record.numeric_magnitude(), Ok(12500.0));
    }

    #[test]
    fn magnitude_rejects_null_and_text() {
        let record = SignalRecord::new(Category::Hiring, "jobs").with_magnitude(json!(null));
        assert_eq!(record.numeric_magnitude(), Err(SkipReason::MissingMagnitude));

        let record = SignalRecord::new(Category::Hiring, "jobs").with_magnitude("lots");
        assert_eq!(record.numeric_magnitude(), Err(SkipReason::MalformedMagnitude));

        let record = SignalRecord::new(Category::Hiring, "jobs").with_magnitude(json!([1]));
        assert_eq!(record.numeric_magnitude(), Err(SkipReason::MalformedMagnitude));
    }

    #[test]
    fn parses_dates_and_rfc3339() {
        let day = parse_timestamp("2025-03-04").unwrap();
        assert_eq!(day.to_rfc3339(), "2025-03-04T00:00:00+00:00");

        let ts = parse_timestamp("2025-03-04T10:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-04T08:30:00+00:00");

        let trailing = parse_timestamp("2025-03-04 some junk").unwrap();
        assert_eq!(trailing.date_naive(), NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn ranked_breaks_ties_by_slug() {
        let mut card = ScoreCard::default();
        card.scores.insert("beta".to_string(), 10);
        card.scores.insert("alpha".to_string(), 10);
        card.scores.insert("gamma".to_string(), 30);
        let ranked = card.ranked();
        assert_eq!(ranked, vec![("gamma", 30), ("alpha", 10), ("beta", 10)]);
    }
}
