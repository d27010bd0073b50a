/// Idempotent DDL for the listings table, its indexes and the `updated_at` trigger.
///
/// Executed through `sqlx::raw_sql` so the multi-statement body runs without
/// prepared statements.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS movies (
    id              BIGSERIAL PRIMARY KEY,
    title           TEXT NOT NULL,
    source_id       TEXT NOT NULL,
    source_name     TEXT NOT NULL,
    location        TEXT NOT NULL DEFAULT '',
    website         TEXT NOT NULL DEFAULT '',
    film_link       TEXT,
    director        TEXT,
    year            INTEGER,
    showtime_text   TEXT NOT NULL,
    description     TEXT,
    captured_at     TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    tmdb_id         BIGINT,
    poster_url      TEXT,
    backdrop_url    TEXT,
    runtime         INTEGER,
    tmdb_rating     DOUBLE PRECISION,
    genres          TEXT,
    cast_members    TEXT,
    tmdb_overview   TEXT,
    enriched_at     TIMESTAMPTZ,
    CONSTRAINT movies_dedup_key UNIQUE (title, source_id, captured_at),
    CONSTRAINT movies_enrichment_complete CHECK (
        (enriched_at IS NULL AND tmdb_id IS NULL)
        OR (enriched_at IS NOT NULL AND tmdb_id IS NOT NULL)
    )
);

CREATE INDEX IF NOT EXISTS idx_movies_source ON movies (source_id);
CREATE INDEX IF NOT EXISTS idx_movies_captured ON movies (captured_at DESC);
CREATE INDEX IF NOT EXISTS idx_movies_tmdb_id ON movies (tmdb_id);
CREATE INDEX IF NOT EXISTS idx_movies_enriched ON movies (enriched_at DESC);

CREATE OR REPLACE FUNCTION movies_touch_updated_at()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = GREATEST(now(), NEW.created_at);
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS movies_touch_updated_at ON movies;
CREATE TRIGGER movies_touch_updated_at
    BEFORE UPDATE ON movies
    FOR EACH ROW
    EXECUTE FUNCTION movies_touch_updated_at();
"#;

/// Advisory-lock key held for the duration of one ingestion run.
pub const INGEST_LOCK_KEY: i64 = 0x1d1e_f11c;

/// Column list shared by every `SELECT` on `movies`.
pub const RECORD_COLUMNS: &str = "id, title, source_id, source_name, location, website, film_link, \
     director, year, showtime_text, description, captured_at, created_at, updated_at, \
     tmdb_id, poster_url, backdrop_url, runtime, tmdb_rating, genres, cast_members, \
     tmdb_overview, enriched_at";
