//! Competitive momentum engine.
//!
//! Reduces heterogeneous competitor signals (funding news, hiring, installs,
//! discussions, releases, pricing, community size) into per-entity momentum
//! scores, day-over-day alerts and cross-source patterns.

pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod matcher;
pub mod models;
pub mod patterns;
pub mod pipeline;
pub mod scoring;
pub mod sources;
pub mod trend;

pub use config::Config;
pub use error::{Error, Result};
pub use history::{HistoryStore, JsonFileStore, MemoryStore, Series, SeriesKind};
pub use matcher::EntityMatcher;
pub use models::{Alert, AlertKind, Category, Pattern, PatternKind, ScoreCard, Severity, SignalRecord, Snapshot};
pub use pipeline::{Engine, RunOutput};
pub use sources::SourceBatch;
