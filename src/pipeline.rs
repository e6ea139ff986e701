//! One batch run: signals in, scores/alerts/patterns out, history updated.
//!
//! ```text
//! input dir → SourceBatch → hiring/install series upsert
//!     ↓
//! ScoringEngine → momentum series upsert
//!     ↓
//! TrendDetector + PatternCorrelator → RunOutput → output dir
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::history::{self, HistoryStore, Series, SeriesKind};
use crate::models::{Alert, Pattern, ScoreCard, Snapshot};
use crate::patterns::{PatternCorrelator, PatternInputs};
use crate::scoring::ScoringEngine;
use crate::sources::{hiring_records, LoadReport, SourceBatch};
use crate::trend::{TrendDetector, TrendInputs};

pub const SCORES_FILE: &str = "scores.json";
pub const ALERTS_FILE: &str = "alerts.json";
pub const PATTERNS_FILE: &str = "patterns.json";

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub date: NaiveDate,
    pub card: ScoreCard,
    pub alerts: Vec<Alert>,
    pub patterns: Vec<Pattern>,
    pub report: LoadReport,
}

pub struct Engine {
    config: Config,
    scoring: ScoringEngine,
    trend: TrendDetector,
    patterns: PatternCorrelator,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scoring: ScoringEngine::new(&config)?,
            trend: TrendDetector::new(&config),
            patterns: PatternCorrelator::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Loads `dir` with this engine's roster.
    pub fn load(&self, dir: &Path) -> SourceBatch {
        SourceBatch::load_dir(dir, self.scoring.matcher())
    }

    /// Scores `batch` with net-new hiring derived from stored history,
    /// without writing to `store`.
    pub async fn score_only(
        &self,
        store: &dyn HistoryStore,
        batch: SourceBatch,
        date: NaiveDate,
        as_of: DateTime<Utc>,
    ) -> Result<ScoreCard> {
        let SourceBatch {
            mut records,
            hiring,
            ..
        } = batch;
        let mut series = store.read(SeriesKind::Hiring).await?;
        merge_hiring(&mut series, &hiring.current, hiring.history, date);
        records.extend(hiring_records(&hiring.current, series.before(date)));
        Ok(self.scoring.score(&records, as_of))
    }

    /// Only history-store faults are returned as errors.
    pub async fn run(
        &self,
        store: &dyn HistoryStore,
        batch: SourceBatch,
        date: NaiveDate,
        as_of: DateTime<Utc>,
    ) -> Result<RunOutput> {
        let SourceBatch {
            mut records,
            hiring,
            installs,
            report,
        } = batch;

        let hiring_series = update_hiring(store, &hiring.current, hiring.history, date).await?;
        records.extend(hiring_records(&hiring.current, hiring_series.before(date)));

        let install_series = if installs.is_empty() {
            store.read(SeriesKind::Installs).await?
        } else {
            history::record(store, SeriesKind::Installs, Snapshot::new(date, installs)).await?
        };

        let card = self.scoring.score(&records, as_of);
        let momentum =
            history::record(store, SeriesKind::Momentum, Snapshot::from_card(date, &card)).await?;

        let alerts = self.trend.detect(&TrendInputs {
            date,
            as_of,
            momentum: &momentum,
            hiring: &hiring_series,
            installs: &install_series,
            records: &records,
        });
        let patterns = self.patterns.correlate(&PatternInputs {
            as_of,
            records: &records,
            hiring: &hiring.current,
            momentum: &momentum,
        });

        info!(
            "Run {} complete: {} records scored ({} skipped), {} alerts, {} patterns",
            date,
            records.len(),
            card.skipped.len(),
            alerts.len(),
            patterns.len()
        );

        Ok(RunOutput {
            date,
            card,
            alerts,
            patterns,
            report,
        })
    }
}

/// Backfills scraper-kept history for dates the store lacks, then records
/// today's counts.
async fn update_hiring(
    store: &dyn HistoryStore,
    current: &BTreeMap<String, i64>,
    backfill: Vec<Snapshot>,
    date: NaiveDate,
) -> Result<Series> {
    let mut series = store.read(SeriesKind::Hiring).await?;
    if merge_hiring(&mut series, current, backfill, date) {
        series.trim(SeriesKind::Hiring.retention());
        store.write(SeriesKind::Hiring, &series).await?;
    }
    Ok(series)
}

/// Returns whether `series` changed.
fn merge_hiring(
    series: &mut Series,
    current: &BTreeMap<String, i64>,
    backfill: Vec<Snapshot>,
    date: NaiveDate,
) -> bool {
    let mut changed = false;
    for snapshot in backfill {
        if snapshot.date < date && series.get(snapshot.date).is_none() {
            series.append(snapshot);
            changed = true;
        }
    }
    if !current.is_empty() {
        series.append(Snapshot::new(date, current.clone()));
        changed = true;
    }
    changed
}

/// Run date and the instant recency windows are measured from. An explicit
/// date is treated as its last second.
pub fn run_clock(date: Option<NaiveDate>) -> (NaiveDate, DateTime<Utc>) {
    match date.and_then(|d| d.and_hms_opt(23, 59, 59)) {
        Some(end_of_day) => (end_of_day.date(), end_of_day.and_utc()),
        None => {
            let now = Utc::now();
            (now.date_naive(), now)
        }
    }
}

#[derive(Serialize)]
struct ScoresFile<'a> {
    date: NaiveDate,
    scores: &'a BTreeMap<String, i64>,
    signals: &'a BTreeMap<String, Vec<String>>,
}

pub fn write_outputs(dir: &Path, output: &RunOutput) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let scores = ScoresFile {
        date: output.date,
        scores: &output.card.scores,
        signals: &output.card.signals,
    };
    std::fs::write(dir.join(SCORES_FILE), serde_json::to_vec_pretty(&scores)?)?;
    std::fs::write(dir.join(ALERTS_FILE), serde_json::to_vec_pretty(&output.alerts)?)?;
    std::fs::write(dir.join(PATTERNS_FILE), serde_json::to_vec_pretty(&output.patterns)?)?;
    info!("Wrote run outputs to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;
    use crate::models::{AlertKind, Entity};

    fn engine() -> Engine {
        Engine::new(Config {
            entities: vec![
                Entity::new("acme", "Acme", &["acme"]),
                Entity::new("globex", "Globex", &["globex"]),
            ],
            ..Config::default()
        })
        .unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    #[test]
    fn run_clock_uses_end_of_explicit_day() {
        let (day, as_of) = run_clock(Some(date(3)));
        assert_eq!(day, date(3));
        assert_eq!(as_of.to_rfc3339(), "2025-07-03T23:59:59+00:00");
    }

    #[tokio::test]
    async fn empty_input_yields_zero_scores() {
        let store = MemoryStore::new();
        let (day, as_of) = run_clock(Some(date(1)));
        let output = engine().run(&store, SourceBatch::default(), day, as_of).await.unwrap();
        assert_eq!(output.card.scores.len(), 2);
        assert!(output.card.scores.values().all(|s| *s == 0));
        assert!(output.alerts.is_empty());
        assert!(output.patterns.is_empty());
        assert_eq!(store.snapshot(SeriesKind::Momentum).len(), 1);
        assert!(store.snapshot(SeriesKind::Hiring).is_empty());
    }

    #[tokio::test]
    async fn hiring_backfill_drives_net_new_and_alerts() {
        let store = MemoryStore::new();
        let mut batch = SourceBatch::default();
        batch.hiring.current = [("acme".to_string(), 12)].into();
        batch.hiring.history = vec![
            Snapshot::new(date(1), [("acme".to_string(), 2)].into()),
            Snapshot::new(date(2), [("acme".to_string(), 99)].into()),
        ];
        let (day, as_of) = run_clock(Some(date(2)));
        let output = engine().run(&store, batch, day, as_of).await.unwrap();

        // scraper history for the run date itself is superseded by today's counts
        let hiring = store.snapshot(SeriesKind::Hiring);
        assert_eq!(hiring.len(), 2);
        assert_eq!(hiring.latest().unwrap().scores["acme"], 12);

        assert_eq!(output.card.scores["acme"], 20);
        assert_eq!(output.alerts.len(), 1);
        assert_eq!(output.alerts[0].kind, AlertKind::HiringSurge);
    }

    #[tokio::test]
    async fn hiring_alerts_are_not_repeated_on_days_without_hiring_input() {
        let store = MemoryStore::new();
        let engine = engine();
        let hiring_day = |count: i64| {
            let mut batch = SourceBatch::default();
            batch.hiring.current = [("acme".to_string(), count)].into();
            batch
        };

        for (day, batch) in [(1, hiring_day(2)), (2, hiring_day(12))] {
            let (day, as_of) = run_clock(Some(date(day)));
            engine.run(&store, batch, day, as_of).await.unwrap();
        }
        for day in [3, 4] {
            let (day, as_of) = run_clock(Some(date(day)));
            let output = engine.run(&store, SourceBatch::default(), day, as_of).await.unwrap();
            assert!(output.alerts.iter().all(|a| a.kind != AlertKind::HiringSurge));
            assert_eq!(output.card.scores["acme"], 0);
        }
    }

    #[tokio::test]
    async fn score_only_uses_stored_hiring_without_writing() {
        let store = MemoryStore::with_series(
            SeriesKind::Hiring,
            Series::from(vec![Snapshot::new(date(1), [("acme".to_string(), 2)].into())]),
        );
        let mut batch = SourceBatch::default();
        batch.hiring.current = [("acme".to_string(), 7)].into();
        let (day, as_of) = run_clock(Some(date(2)));

        let card = engine().score_only(&store, batch, day, as_of).await.unwrap();
        assert_eq!(card.scores["acme"], 10);
        assert_eq!(store.snapshot(SeriesKind::Hiring).len(), 1);
        assert!(store.snapshot(SeriesKind::Momentum).is_empty());
    }

    #[tokio::test]
    async fn rerun_same_day_overwrites_snapshot() {
        let store = MemoryStore::new();
        let engine = engine();
        let (day, as_of) = run_clock(Some(date(5)));

        let mut first = SourceBatch::default();
        first.records.push(crate::models::SignalRecord::new(
            crate::models::Category::News,
            "Acme launches",
        ));
        engine.run(&store, first, day, as_of).await.unwrap();
        engine.run(&store, SourceBatch::default(), day, as_of).await.unwrap();

        let momentum = store.snapshot(SeriesKind::Momentum);
        assert_eq!(momentum.len(), 1);
        assert_eq!(momentum.latest().unwrap().scores["acme"], 0);
    }

    #[tokio::test]
    async fn outputs_are_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let (day, as_of) = run_clock(Some(date(6)));
        let output = engine().run(&store, SourceBatch::default(), day, as_of).await.unwrap();
        write_outputs(dir.path(), &output).unwrap();

        let scores: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(SCORES_FILE)).unwrap()).unwrap();
        assert_eq!(scores["date"], "2025-07-06");
        assert_eq!(scores["scores"]["acme"], 0);
        let alerts: Vec<Alert> =
            serde_json::from_slice(&std::fs::read(dir.path().join(ALERTS_FILE)).unwrap()).unwrap();
        assert!(alerts.is_empty());
        assert!(dir.path().join(PATTERNS_FILE).exists());
    }
}
