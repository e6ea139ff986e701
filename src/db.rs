use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::history::{HistoryStore, Series, SeriesKind};
use crate::models::Snapshot;

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// History store backed by `competitor_momentum.snapshots`, one row per
/// (series, date).
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn read(&self, kind: SeriesKind) -> Result<Series> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot_date, scores, signals
            FROM competitor_momentum.snapshots
            WHERE series = $1
            ORDER BY snapshot_date
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let scores: Json<BTreeMap<String, i64>> = row.try_get("scores")?;
            let signals: Json<BTreeMap<String, Vec<String>>> = row.try_get("signals")?;
            entries.push(Snapshot {
                date: row.try_get("snapshot_date")?,
                scores: scores.0,
                signals: signals.0,
            });
        }

        Ok(Series::from(entries))
    }

    async fn write(&self, kind: SeriesKind, series: &Series) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for snapshot in series.entries() {
            sqlx::query(
                r#"
                INSERT INTO competitor_momentum.snapshots
                (id, series, snapshot_date, scores, signals)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (series, snapshot_date) DO UPDATE
                SET scores = EXCLUDED.scores,
                    signals = EXCLUDED.signals,
                    recorded_at = now()
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(kind.as_str())
            .bind(snapshot.date)
            .bind(Json(&snapshot.scores))
            .bind(Json(&snapshot.signals))
            .execute(&mut *tx)
            .await?;
        }

        // Rows trimmed out of the series are dropped so the table mirrors it.
        let kept: Vec<NaiveDate> = series.entries().iter().map(|s| s.date).collect();
        sqlx::query(
            r#"
            DELETE FROM competitor_momentum.snapshots
            WHERE series = $1 AND snapshot_date <> ALL($2)
            "#,
        )
        .bind(kind.as_str())
        .bind(kept)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
