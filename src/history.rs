//! Date-keyed snapshot history with retention trimming.
//!
//! A `Series` holds at most one snapshot per calendar date, ordered by date.
//! Stores persist whole series; the engine never touches storage directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Momentum,
    Hiring,
    Installs,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 3] = [SeriesKind::Momentum, SeriesKind::Hiring, SeriesKind::Installs];

    pub fn retention(&self) -> usize {
        match self {
            SeriesKind::Momentum => 90,
            SeriesKind::Hiring | SeriesKind::Installs => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Momentum => "momentum",
            SeriesKind::Hiring => "hiring",
            SeriesKind::Installs => "installs",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Snapshot>", into = "Vec<Snapshot>")]
pub struct Series {
    entries: Vec<Snapshot>,
}

impl From<Vec<Snapshot>> for Series {
    fn from(entries: Vec<Snapshot>) -> Self {
        let mut series = Series::default();
        for snapshot in entries {
            series.append(snapshot);
        }
        series
    }
}

impl From<Series> for Vec<Snapshot> {
    fn from(series: Series) -> Self {
        series.entries
    }
}

impl Series {
    pub fn entries(&self) -> &[Snapshot] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keyed upsert: an existing entry for the same date is replaced in
    /// place, otherwise the snapshot is inserted at its date position.
    pub fn append(&mut self, snapshot: Snapshot) {
        match self.entries.binary_search_by(|e| e.date.cmp(&snapshot.date)) {
            Ok(idx) => self.entries[idx] = snapshot,
            Err(idx) => self.entries.insert(idx, snapshot),
        }
    }

    /// Keeps the chronologically latest `max_entries`.
    pub fn trim(&mut self, max_entries: usize) {
        if self.entries.len() > max_entries {
            let excess = self.entries.len() - max_entries;
            self.entries.drain(..excess);
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Snapshot> {
        self.entries
            .binary_search_by(|e| e.date.cmp(&date))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.last()
    }

    /// `(previous, latest)` when at least two entries exist.
    pub fn last_two(&self) -> Option<(&Snapshot, &Snapshot)> {
        match self.entries.as_slice() {
            [.., previous, latest] => Some((previous, latest)),
            _ => None,
        }
    }

    /// Most recent entry dated strictly before `date`.
    pub fn before(&self, date: NaiveDate) -> Option<&Snapshot> {
        self.entries.iter().rev().find(|e| e.date < date)
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn read(&self, kind: SeriesKind) -> Result<Series>;

    async fn write(&self, kind: SeriesKind, series: &Series) -> Result<()>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

/// Reads `kind`, upserts `snapshot`, trims to the kind's retention and
/// persists the result.
pub async fn record(store: &dyn HistoryStore, kind: SeriesKind, snapshot: Snapshot) -> Result<Series> {
    let mut series = store.read(kind).await?;
    let date = snapshot.date;
    series.append(snapshot);
    series.trim(kind.retention());
    store.write(kind, &series).await?;
    debug!(
        "Recorded {} snapshot for {} in {} store ({} entries)",
        kind.as_str(),
        date,
        store.backend_type(),
        series.len()
    );
    Ok(series)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    momentum: Series,
    #[serde(default)]
    hiring: Series,
    #[serde(default)]
    installs: Series,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl HistoryFile {
    fn series_mut(&mut self, kind: SeriesKind) -> &mut Series {
        match kind {
            SeriesKind::Momentum => &mut self.momentum,
            SeriesKind::Hiring => &mut self.hiring,
            SeriesKind::Installs => &mut self.installs,
        }
    }
}

/// All series in one JSON document at a fixed path.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HistoryFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No history at {}, starting fresh", self.path.display());
                Ok(HistoryFile::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn read(&self, kind: SeriesKind) -> Result<Series> {
        let mut file = self.load().await?;
        Ok(std::mem::take(file.series_mut(kind)))
    }

    async fn write(&self, kind: SeriesKind, series: &Series) -> Result<()> {
        let mut file = self.load().await?;
        *file.series_mut(kind) = series.clone();
        file.updated_at = Some(Utc::now());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "json"
    }
}

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    series: Mutex<HashMap<SeriesKind, Series>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(kind: SeriesKind, series: Series) -> Self {
        let store = Self::default();
        store.lock().insert(kind, series);
        store
    }

    pub fn snapshot(&self, kind: SeriesKind) -> Series {
        self.lock().get(&kind).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SeriesKind, Series>> {
        self.series.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn read(&self, kind: SeriesKind) -> Result<Series> {
        Ok(self.snapshot(kind))
    }

    async fn write(&self, kind: SeriesKind, series: &Series) -> Result<()> {
        self.lock().insert(kind, series.clone());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
