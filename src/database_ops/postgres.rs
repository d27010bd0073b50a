use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::schema::{INGEST_LOCK_KEY, RECORD_COLUMNS};
use super::{EnrichmentState, RecordFilter, RecordOrder, Store, StoreStats, UpsertOutcome};
use crate::model::{CanonicalRecord, Enrichment};
use crate::util::db::Db;

/// Bind parameters per inserted row; keeps a batch under the 65535-parameter limit.
const INSERT_COLUMNS: usize = 11;
const MAX_BATCH_ROWS: usize = 65_535 / INSERT_COLUMNS;

/// Postgres-backed `Store`.
pub struct PgStore {
    db: Db,
    // Session-scoped advisory locks live on one connection; hold it for the run.
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            lock_conn: Mutex::new(None),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

fn push_insert_prefix(qb: &mut QueryBuilder<'_, Postgres>) {
    qb.push(
        "INSERT INTO movies (title, source_id, source_name, location, website, film_link, \
         director, year, showtime_text, description, captured_at) ",
    );
}

fn record_from_row(row: &PgRow) -> Result<CanonicalRecord> {
    let enriched_at: Option<DateTime<Utc>> = row.try_get("enriched_at")?;
    let tmdb_id: Option<i64> = row.try_get("tmdb_id")?;
    let enrichment = match (tmdb_id, enriched_at) {
        (Some(tmdb_id), Some(enriched_at)) => Some(Enrichment {
            tmdb_id,
            poster_url: row.try_get("poster_url")?,
            backdrop_url: row.try_get("backdrop_url")?,
            runtime_minutes: row.try_get("runtime")?,
            rating: row.try_get("tmdb_rating")?,
            genres: row.try_get("genres")?,
            cast_members: row.try_get("cast_members")?,
            overview: row.try_get("tmdb_overview")?,
            enriched_at,
        }),
        _ => None,
    };
    Ok(CanonicalRecord {
        id: Some(row.try_get("id")?),
        title: row.try_get("title")?,
        source_id: row.try_get("source_id")?,
        source_display_name: row.try_get("source_name")?,
        location: row.try_get("location")?,
        website: row.try_get("website")?,
        film_link: row.try_get("film_link")?,
        director: row.try_get("director")?,
        year: row.try_get("year")?,
        showtime_text: row.try_get("showtime_text")?,
        description: row.try_get("description")?,
        captured_at: row.try_get("captured_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        enrichment,
    })
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self, record), fields(title = %record.title, source = %record.source_id))]
    async fn upsert(&self, record: &CanonicalRecord) -> Result<bool> {
        let outcome = self.upsert_batch(std::slice::from_ref(record)).await?;
        Ok(outcome.inserted == 1)
    }

    #[instrument(skip(self, records), fields(rows = records.len()))]
    async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        for chunk in records.chunks(MAX_BATCH_ROWS) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("");
            push_insert_prefix(&mut qb);
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(&r.title)
                    .push_bind(&r.source_id)
                    .push_bind(&r.source_display_name)
                    .push_bind(&r.location)
                    .push_bind(&r.website)
                    .push_bind(&r.film_link)
                    .push_bind(&r.director)
                    .push_bind(r.year)
                    .push_bind(&r.showtime_text)
                    .push_bind(&r.description)
                    .push_bind(r.captured_at);
            });
            // Dedup key conflicts are expected on re-ingestion; absorb them.
            qb.push(" ON CONFLICT ON CONSTRAINT movies_dedup_key DO NOTHING");
            let inserted = qb
                .build()
                .persistent(false)
                .execute(&self.db.pool)
                .await
                .context("inserting listings")?
                .rows_affected() as usize;
            outcome.inserted += inserted;
            outcome.absorbed += chunk.len() - inserted.min(chunk.len());
        }
        debug!(
            inserted = outcome.inserted,
            absorbed = outcome.absorbed,
            "upsert batch done"
        );
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn select(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM movies WHERE TRUE"));
        if let Some(source) = &filter.source_id {
            qb.push(" AND source_id = ").push_bind(source);
        }
        match filter.enrichment {
            EnrichmentState::Any => {}
            EnrichmentState::Unenriched => {
                qb.push(" AND enriched_at IS NULL");
            }
            EnrichmentState::EnrichedBefore(cutoff) => {
                qb.push(" AND enriched_at < ").push_bind(cutoff);
            }
        }
        if let Some(since) = filter.captured_since {
            qb.push(" AND captured_at >= ").push_bind(since);
        }
        if let Some(needle) = &filter.title_contains {
            qb.push(" AND LOWER(title) LIKE ")
                .push_bind(format!("%{}%", needle.trim().to_lowercase()));
        }
        qb.push(match filter.order {
            RecordOrder::CapturedDesc => " ORDER BY captured_at DESC, id DESC",
            RecordOrder::EnrichedAsc => " ORDER BY enriched_at ASC NULLS LAST, id ASC",
        });
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb
            .build()
            .persistent(false)
            .fetch_all(&self.db.pool)
            .await
            .context("selecting listings")?;
        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self, enrichment), fields(tmdb_id = enrichment.tmdb_id))]
    async fn update_enrichment(&self, id: i64, enrichment: &Enrichment) -> Result<bool> {
        // Single statement: either every enrichment column lands or none does.
        let result = sqlx::query(
            "UPDATE movies SET tmdb_id = $2, poster_url = $3, backdrop_url = $4, runtime = $5, \
             tmdb_rating = $6, genres = $7, cast_members = $8, tmdb_overview = $9, enriched_at = $10 \
             WHERE id = $1",
        )
        .persistent(false)
        .bind(id)
        .bind(enrichment.tmdb_id)
        .bind(&enrichment.poster_url)
        .bind(&enrichment.backdrop_url)
        .bind(enrichment.runtime_minutes)
        .bind(enrichment.rating)
        .bind(&enrichment.genres)
        .bind(&enrichment.cast_members)
        .bind(&enrichment.overview)
        .bind(enrichment.enriched_at)
        .execute(&self.db.pool)
        .await
        .context("writing enrichment")?;
        Ok(result.rows_affected() == 1)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE captured_at >= (SELECT MAX(captured_at) - INTERVAL '1 day' FROM movies)
                ) AS current,
                COUNT(enriched_at) AS enriched,
                MAX(captured_at) AS last_capture
            FROM movies
            "#,
        )
        .persistent(false)
        .fetch_one(&self.db.pool)
        .await
        .context("reading store stats")?;
        Ok(StoreStats {
            total_records: row.try_get("total")?,
            current_records: row.try_get("current")?,
            enriched_records: row.try_get("enriched")?,
            last_capture: row.try_get("last_capture")?,
        })
    }

    async fn try_lock_ingest(&self) -> Result<bool> {
        let mut slot = self.lock_conn.lock().await;
        if slot.is_some() {
            return Ok(false);
        }
        let mut conn = self
            .db
            .pool
            .acquire()
            .await
            .context("acquiring lock connection")?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(INGEST_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .context("taking ingest advisory lock")?;
        if acquired {
            info!("ingest lock acquired");
            *slot = Some(conn);
        }
        Ok(acquired)
    }

    async fn unlock_ingest(&self) -> Result<()> {
        let Some(mut conn) = self.lock_conn.lock().await.take() else {
            return Ok(());
        };
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(INGEST_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .context("releasing ingest advisory lock")?;
        if !released {
            warn!("ingest lock was not held by this session");
        }
        Ok(())
    }
}
