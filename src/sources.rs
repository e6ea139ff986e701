//! Turns the per-source JSON documents written by the scrapers into
//! canonical `SignalRecord`s.
//!
//! Missing documents count as empty and partially-shaped records are skipped
//! one at a time. Neither ever fails the load.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::matcher::EntityMatcher;
use crate::models::{parse_timestamp, Category, Marketplace, SignalRecord, Snapshot};

pub const CSV_FILE: &str = "signals.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Funding,
    Hiring,
    Marketplace,
    News,
    Social,
    Changelog,
    Pricing,
    Community,
}

impl Source {
    pub const ALL: [Source; 8] = [
        Source::Funding,
        Source::Hiring,
        Source::Marketplace,
        Source::News,
        Source::Social,
        Source::Changelog,
        Source::Pricing,
        Source::Community,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Source::Funding => "funding.json",
            Source::Hiring => "hiring.json",
            Source::Marketplace => "marketplace.json",
            Source::News => "news.json",
            Source::Social => "social.json",
            Source::Changelog => "changelog.json",
            Source::Pricing => "pricing.json",
            Source::Community => "community.json",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub missing: Vec<String>,
    pub unreadable: Vec<String>,
    pub loaded: usize,
    pub skipped: usize,
}

/// Open job postings per entity, plus whatever history the scraper kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HiringCounts {
    pub current: BTreeMap<String, i64>,
    pub history: Vec<Snapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub records: Vec<SignalRecord>,
    pub hiring: HiringCounts,
    /// Total installs per entity, summed across its extensions.
    pub installs: BTreeMap<String, i64>,
    pub report: LoadReport,
}

impl SourceBatch {
    pub fn load_dir(dir: &Path, matcher: &EntityMatcher) -> Self {
        let mut batch = SourceBatch::default();

        for source in Source::ALL {
            let path = dir.join(source.file_name());
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!("Input {} not found, treating as empty", path.display());
                    batch.report.missing.push(source.file_name().to_string());
                    continue;
                }
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    batch.report.unreadable.push(source.file_name().to_string());
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(doc) => batch.ingest(source, &doc, matcher),
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", path.display(), e);
                    batch.report.unreadable.push(source.file_name().to_string());
                }
            }
        }

        let csv_path = dir.join(CSV_FILE);
        if csv_path.exists() {
            batch.ingest_csv(&csv_path);
        }

        info!(
            "Loaded {} signal records ({} skipped, {} inputs missing)",
            batch.report.loaded,
            batch.report.skipped,
            batch.report.missing.len()
        );
        batch
    }

    pub fn ingest(&mut self, source: Source, doc: &Value, matcher: &EntityMatcher) {
        match source {
            Source::Funding => self.ingest_items(source, doc, |item| {
                let title = text(item, "title")?;
                let mut record = SignalRecord::new(Category::Funding, title);
                record.entity = text(item, "competitor");
                record.timestamp = timestamp(item, "date");
                Some(record)
            }),
            Source::News => self.ingest_items(source, doc, |item| {
                let mut record = SignalRecord::new(Category::News, text(item, "title")?);
                record.timestamp = timestamp(item, "date");
                Some(record)
            }),
            Source::Social => self.ingest_items(source, doc, |item| {
                let mut record = SignalRecord::new(Category::Social, text(item, "title")?);
                record.magnitude = item.get("points").cloned();
                record.timestamp = timestamp(item, "date");
                Some(record)
            }),
            Source::Changelog => self.ingest_items(source, doc, |item| {
                let title = text(item, "title")?;
                let raw = match text(item, "description") {
                    Some(description) => format!("{title}. {description}"),
                    None => title,
                };
                let mut record = SignalRecord::new(Category::Changelog, raw);
                record.entity = text(item, "competitor");
                record.timestamp = timestamp(item, "date");
                Some(record)
            }),
            Source::Pricing => self.ingest_items(source, doc, |item| {
                let competitor = text(item, "competitor")?;
                let summary = text(item, "summary")
                    .unwrap_or_else(|| "pricing page changed".to_string());
                let mut record =
                    SignalRecord::new(Category::Pricing, format!("{competitor}: {summary}"));
                record.entity = Some(competitor);
                record.timestamp = timestamp(item, "date");
                Some(record)
            }),
            Source::Community => self.ingest_items(source, doc, |item| {
                let competitor = text(item, "competitor")?;
                let raw = match text(item, "platform") {
                    Some(platform) => format!("{competitor} {platform}"),
                    None => competitor.clone(),
                };
                let mut record = SignalRecord::new(Category::CommunitySize, raw);
                record.entity = Some(competitor);
                record.magnitude = Some(item.get("members")?.clone());
                Some(record)
            }),
            Source::Marketplace => self.ingest_marketplace(doc, matcher),
            Source::Hiring => self.ingest_hiring(doc, matcher),
        }
    }

    fn ingest_items<F>(&mut self, source: Source, doc: &Value, parse: F)
    where
        F: Fn(&Map<String, Value>) -> Option<SignalRecord>,
    {
        let Some(items) = doc.as_array() else {
            warn!("{} is not an array, ignoring it", source.file_name());
            self.report.unreadable.push(source.file_name().to_string());
            return;
        };
        for (idx, item) in items.iter().enumerate() {
            match item.as_object().and_then(&parse) {
                Some(record) => {
                    self.records.push(record);
                    self.report.loaded += 1;
                }
                None => {
                    warn!("Skipping malformed record #{} in {}", idx, source.file_name());
                    self.report.skipped += 1;
                }
            }
        }
    }

    fn ingest_marketplace(&mut self, doc: &Value, matcher: &EntityMatcher) {
        let Some(extensions) = doc.as_object() else {
            warn!("marketplace.json is not an object, ignoring it");
            self.report.unreadable.push(Source::Marketplace.file_name().to_string());
            return;
        };
        for (extension_id, stats) in extensions {
            let Some(stats) = stats.as_object() else {
                warn!("Skipping marketplace entry {}: not an object", extension_id);
                self.report.skipped += 1;
                continue;
            };
            let marketplace = stats
                .get("marketplace")
                .cloned()
                .and_then(|v| serde_json::from_value::<Marketplace>(v).ok())
                .unwrap_or_default();

            let mut record = SignalRecord::new(Category::MarketplaceInstall, extension_id.clone())
                .with_marketplace(marketplace);
            record.magnitude = stats.get("weeklyGrowth").cloned();
            self.records.push(record);
            self.report.loaded += 1;

            let installs = stats.get("installs").and_then(as_count);
            match (installs, matcher.match_text(extension_id)) {
                (Some(installs), Some(slug)) => {
                    let total = self.installs.entry(slug.to_string()).or_insert(0);
                    *total = total.saturating_add(installs);
                }
                (None, _) => debug!("No install total for {}", extension_id),
                (_, None) => debug!("Extension {} matches no entity", extension_id),
            }
        }
    }

    fn ingest_hiring(&mut self, doc: &Value, matcher: &EntityMatcher) {
        if let Some(current) = doc.get("current") {
            self.hiring.current = self.resolve_counts(current, matcher);
        }
        if let Some(history) = doc.get("history").and_then(Value::as_array) {
            for entry in history {
                let date = entry
                    .get("date")
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp)
                    .map(|ts| ts.date_naive());
                match (date, entry.get("counts")) {
                    (Some(date), Some(counts)) => {
                        let counts = self.resolve_counts(counts, matcher);
                        self.hiring.history.push(Snapshot::new(date, counts));
                    }
                    _ => {
                        warn!("Skipping hiring history entry without date or counts");
                        self.report.skipped += 1;
                    }
                }
            }
        }
    }

    fn resolve_counts(&mut self, counts: &Value, matcher: &EntityMatcher) -> BTreeMap<String, i64> {
        let mut resolved = BTreeMap::new();
        let Some(counts) = counts.as_object() else {
            warn!("Hiring counts are not an object");
            self.report.skipped += 1;
            return resolved;
        };
        for (name, count) in counts {
            let Some(count) = as_count(count) else {
                warn!("Skipping non-numeric job count for {}", name);
                self.report.skipped += 1;
                continue;
            };
            match matcher.resolve(Some(name), name) {
                Some(slug) => *resolved.entry(slug.to_string()).or_insert(0) += count,
                None => debug!("Hiring key {} matches no entity", name),
            }
        }
        resolved
    }

    fn ingest_csv(&mut self, path: &Path) {
        #[derive(Deserialize)]
        struct CsvRow {
            entity: Option<String>,
            category: Category,
            raw_text: String,
            magnitude: Option<String>,
            timestamp: Option<String>,
        }

        let mut reader = match csv::Reader::from_path(path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                self.report.unreadable.push(CSV_FILE.to_string());
                return;
            }
        };

        for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping {} row {}: {}", CSV_FILE, idx + 1, e);
                    self.report.skipped += 1;
                    continue;
                }
            };
            let mut record = SignalRecord::new(row.category, row.raw_text);
            record.entity = row.entity.filter(|e| !e.trim().is_empty());
            record.magnitude = row.magnitude.map(|m| magnitude_value(&m));
            record.timestamp = row.timestamp.as_deref().and_then(parse_timestamp);
            self.records.push(record);
            self.report.loaded += 1;
        }
    }
}

/// Hiring records carrying net new postings relative to `previous`.
/// Without a previous period there is nothing to diff against.
pub fn hiring_records(current: &BTreeMap<String, i64>, previous: Option<&Snapshot>) -> Vec<SignalRecord> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    current
        .iter()
        .map(|(slug, count)| {
            let before = previous.scores.get(slug).copied().unwrap_or(0);
            SignalRecord::new(
                Category::Hiring,
                format!("{slug}: {count} open roles (was {before})"),
            )
            .with_entity(slug.clone())
            .with_magnitude(count - before)
        })
        .collect()
}

fn text(item: &Map<String, Value>, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn timestamp(item: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    item.get(key).and_then(Value::as_str).and_then(parse_timestamp)
}

fn as_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn magnitude_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(trimmed.to_string()),
    }
}
