//! SQL schema for the memeprop SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The external post store. Rows are only ever appended.
CREATE TABLE IF NOT EXISTS staging_image_posts (
    id          TEXT PRIMARY KEY,
    subreddit   TEXT NOT NULL,
    title       TEXT,
    url         TEXT,
    score       INTEGER NOT NULL,
    created_utc INTEGER            -- seconds since epoch; NULL when unknown
);

-- Derived relations below are replaced wholesale by every analysis run.

CREATE TABLE IF NOT EXISTS title_fingerprints (
    id          TEXT PRIMARY KEY REFERENCES staging_image_posts(id),
    fingerprint TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fingerprint_stats (
    fingerprint       TEXT PRIMARY KEY,
    appearances       INTEGER NOT NULL,
    unique_subreddits INTEGER NOT NULL,
    peak_score        INTEGER NOT NULL,
    time_to_peak_s    INTEGER,
    CHECK (appearances >= unique_subreddits AND unique_subreddits >= 1),
    CHECK (time_to_peak_s IS NULL OR time_to_peak_s >= 0)
);

CREATE TABLE IF NOT EXISTS subreddit_adoption_stats (
    subreddit                TEXT PRIMARY KEY,
    unique_fingerprints      INTEGER NOT NULL CHECK (unique_fingerprints >= 1),
    originated_count         INTEGER NOT NULL,
    avg_adoption_delay_hours REAL,
    total_posts              INTEGER NOT NULL,
    avg_best_score           REAL NOT NULL,
    originator_rate_pct      REAL NOT NULL
                             CHECK (originator_rate_pct BETWEEN 0 AND 100)
);

CREATE TABLE IF NOT EXISTS image_mutations (
    url               TEXT PRIMARY KEY,
    distinct_captions INTEGER NOT NULL,
    first_seen        INTEGER,
    total_posts       INTEGER NOT NULL
);

-- One row per materialised run; diagnostics never leak into the relations.
CREATE TABLE IF NOT EXISTS analysis_runs (
    run_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    completed_at TEXT NOT NULL,    -- ISO 8601 UTC
    total_posts  INTEGER NOT NULL,
    rejected     INTEGER NOT NULL,
    diagnostics  TEXT NOT NULL     -- JSON-encoded Diagnostics
);

CREATE INDEX IF NOT EXISTS title_fingerprints_fp_idx ON title_fingerprints(fingerprint);
CREATE INDEX IF NOT EXISTS posts_url_idx             ON staging_image_posts(url);
CREATE INDEX IF NOT EXISTS posts_created_idx         ON staging_image_posts(created_utc);

PRAGMA user_version = 1;
";
