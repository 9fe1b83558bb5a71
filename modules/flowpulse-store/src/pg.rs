//! Postgres snapshot store.
//!
//! Holds exactly one published snapshot: a single metadata row plus one JSONB
//! row per workflow. Publishing replaces both inside one transaction, so
//! readers see either the old snapshot or the new one.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowpulse_common::{CanonicalSnapshot, CanonicalWorkflow, FlowPulseError};
use flowpulse_engine::PublishTarget;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::serving::SnapshotSource;

#[derive(Clone)]
pub struct SnapshotStore {
    pool: PgPool,
    timeout: Duration,
}

impl SnapshotStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Pool that connects on first use, so an unreachable database surfaces
    /// as a failed read instead of a startup error.
    pub fn connect_lazy(database_url: &str, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect_lazy(database_url)?;
        Ok(Self::new(pool, timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Replace the stored snapshot wholesale.
    pub async fn replace_snapshot(&self, snapshot: &CanonicalSnapshot) -> Result<()> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM canonical_workflows")
                .execute(&mut *tx)
                .await?;

            for (position, workflow) in snapshot.workflows.iter().enumerate() {
                let platforms: Vec<String> = workflow
                    .platforms
                    .iter()
                    .map(|p| p.as_str().to_string())
                    .collect();
                sqlx::query(
                    r#"
                    INSERT INTO canonical_workflows
                        (id, position, group_key, title, platforms, primary_country,
                         popularity_score, snapshot_version, body)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(workflow.id)
                .bind(position as i32)
                .bind(&workflow.group_key)
                .bind(&workflow.title)
                .bind(&platforms)
                .bind(&workflow.primary_country)
                .bind(workflow.popularity_score.combined)
                .bind(&workflow.snapshot_version)
                .bind(Json(workflow))
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO canonical_snapshot (id, snapshot_version, generated_at, published_at)
                VALUES (1, $1, $2, now())
                ON CONFLICT (id) DO UPDATE
                SET snapshot_version = EXCLUDED.snapshot_version,
                    generated_at     = EXCLUDED.generated_at,
                    published_at     = EXCLUDED.published_at
                "#,
            )
            .bind(&snapshot.snapshot_version)
            .bind(snapshot.generated_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, StoreError>(())
        })
        .await?;

        info!(
            version = %snapshot.snapshot_version,
            workflows = snapshot.workflows.len(),
            "Snapshot written to store"
        );
        Ok(())
    }

    /// The published snapshot, `None` when nothing was published yet.
    ///
    /// Header and rows are read from one repeatable-read snapshot of the
    /// database, so a concurrent publish is seen entirely or not at all.
    pub async fn load_snapshot(&self) -> Result<Option<CanonicalSnapshot>> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                .execute(&mut *tx)
                .await?;

            let meta = sqlx::query_as::<_, (String, DateTime<Utc>)>(
                "SELECT snapshot_version, generated_at FROM canonical_snapshot WHERE id = 1",
            )
            .fetch_optional(&mut *tx)
            .await?;
            let Some((snapshot_version, generated_at)) = meta else {
                tx.commit().await?;
                return Ok::<_, StoreError>(None);
            };

            let rows = sqlx::query_as::<_, (Json<CanonicalWorkflow>,)>(
                "SELECT body FROM canonical_workflows ORDER BY position ASC",
            )
            .fetch_all(&mut *tx)
            .await?;
            tx.commit().await?;

            let workflows: Vec<CanonicalWorkflow> = rows.into_iter().map(|(Json(w),)| w).collect();
            if let Some(stray) = workflows.iter().find(|w| w.snapshot_version != snapshot_version) {
                return Err(StoreError::MixedSnapshot {
                    header: snapshot_version,
                    row: stray.snapshot_version.clone(),
                });
            }

            Ok(Some(CanonicalSnapshot {
                snapshot_version,
                generated_at,
                workflows,
            }))
        })
        .await
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl PublishTarget for SnapshotStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn publish(&self, snapshot: &CanonicalSnapshot) -> std::result::Result<(), FlowPulseError> {
        self.replace_snapshot(snapshot)
            .await
            .map_err(|e| FlowPulseError::publish("postgres", e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for SnapshotStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn load(&self) -> Result<CanonicalSnapshot> {
        self.load_snapshot().await?.ok_or(StoreError::Empty)
    }
}
