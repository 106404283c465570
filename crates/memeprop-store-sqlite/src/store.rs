//! [`SqliteStore`] — the SQLite implementation of [`PropagationStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension as _};

use memeprop_core::{
  adoption::SubredditAdoptionStats,
  batch::Analysis,
  fingerprint::Fingerprint,
  mutation::ImageMutation,
  post::Post,
  propagation::FingerprintStats,
  store::{AdoptionQuery, FingerprintQuery, PropagationStore, RunRecord},
  timeline::TimelineEntry,
};

use crate::{
  Error, Result,
  encode::{
    RawAdoptionStats, RawFingerprintStats, RawImageMutation, RawRun, encode_count,
    encode_dt, post_from_row, timeline_entry_from_row,
  },
  schema::SCHEMA,
};

/// SQLite's "no limit" sentinel for `LIMIT ?`.
fn encode_limit(limit: Option<usize>) -> i64 {
  limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
  )
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A memeprop store backed by a single SQLite file.
///
/// Clones share one background connection thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a throwaway in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── PropagationStore impl ───────────────────────────────────────────────────

impl PropagationStore for SqliteStore {
  type Error = Error;

  // ── Post store ────────────────────────────────────────────────────────────

  async fn stage_posts(&self, posts: Vec<Post>) -> Result<usize> {
    // Inner `Err` carries the offending id; the transaction rolls back on drop.
    let outcome: std::result::Result<usize, String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO staging_image_posts (id, subreddit, title, url, score, created_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for p in &posts {
            let inserted = stmt.execute(rusqlite::params![
              p.id,
              p.subreddit,
              p.title,
              p.url,
              p.score,
              p.created_utc,
            ]);
            match inserted {
              Ok(_) => {}
              Err(e) if is_constraint_violation(&e) => return Ok(Err(p.id.clone())),
              Err(e) => return Err(e.into()),
            }
          }
        }
        tx.commit()?;
        Ok(Ok(posts.len()))
      })
      .await?;

    outcome.map_err(|id| {
      tracing::warn!(post_id = %id, "refusing to stage a duplicate post id");
      Error::DuplicatePost(id)
    })
  }

  async fn load_posts(&self) -> Result<Vec<Post>> {
    let posts = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, subreddit, title, url, score, created_utc
           FROM staging_image_posts
           ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], post_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(posts)
  }

  // ── Derived relations ─────────────────────────────────────────────────────

  async fn materialize(&self, analysis: &Analysis) -> Result<RunRecord> {
    let assignments: Vec<(String, String)> = analysis
      .assignments
      .iter()
      .map(|a| (a.post_id.clone(), a.fingerprint.as_str().to_owned()))
      .collect();
    let fingerprint_rows: Vec<RawFingerprintStats> =
      analysis.fingerprint_stats.iter().map(Into::into).collect();
    let adoption_rows: Vec<RawAdoptionStats> =
      analysis.adoption_stats.iter().map(Into::into).collect();
    let mutation_rows: Vec<RawImageMutation> =
      analysis.image_mutations.iter().map(Into::into).collect();

    let completed_at    = Utc::now();
    let completed_str   = encode_dt(completed_at);
    let diagnostics     = analysis.diagnostics.clone();
    let diagnostics_str = diagnostics.to_json()?;
    let total_posts     = encode_count(diagnostics.total_posts as u64);
    let rejected        = encode_count(diagnostics.rejected_total() as u64);

    let run_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(
          "DELETE FROM title_fingerprints;
           DELETE FROM fingerprint_stats;
           DELETE FROM subreddit_adoption_stats;
           DELETE FROM image_mutations;",
        )?;

        {
          let mut stmt = tx.prepare(
            "INSERT INTO title_fingerprints (id, fingerprint) VALUES (?1, ?2)",
          )?;
          for (id, fp) in &assignments {
            stmt.execute(rusqlite::params![id, fp])?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO fingerprint_stats (
               fingerprint, appearances, unique_subreddits, peak_score, time_to_peak_s
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
          )?;
          for r in &fingerprint_rows {
            stmt.execute(rusqlite::params![
              r.fingerprint,
              r.appearances,
              r.unique_subreddits,
              r.peak_score,
              r.time_to_peak_s,
            ])?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO subreddit_adoption_stats (
               subreddit, unique_fingerprints, originated_count,
               avg_adoption_delay_hours, total_posts, avg_best_score,
               originator_rate_pct
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for r in &adoption_rows {
            stmt.execute(rusqlite::params![
              r.subreddit,
              r.unique_fingerprints,
              r.originated_count,
              r.avg_adoption_delay_hours,
              r.total_posts,
              r.avg_best_score,
              r.originator_rate_pct,
            ])?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO image_mutations (url, distinct_captions, first_seen, total_posts)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for r in &mutation_rows {
            stmt.execute(rusqlite::params![
              r.url,
              r.distinct_captions,
              r.first_seen,
              r.total_posts,
            ])?;
          }
        }

        tx.execute(
          "INSERT INTO analysis_runs (completed_at, total_posts, rejected, diagnostics)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![completed_str, total_posts, rejected, diagnostics_str],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(run_id)
      })
      .await?;

    tracing::debug!(
      run_id,
      fingerprints = analysis.fingerprint_stats.len(),
      subreddits = analysis.adoption_stats.len(),
      "materialised analysis"
    );

    Ok(RunRecord { run_id, completed_at, diagnostics })
  }

  async fn last_run(&self) -> Result<Option<RunRecord>> {
    let raw: Option<RawRun> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT run_id, completed_at, diagnostics
               FROM analysis_runs
               ORDER BY run_id DESC
               LIMIT 1",
              [],
              |row| {
                Ok(RawRun {
                  run_id:       row.get(0)?,
                  completed_at: row.get(1)?,
                  diagnostics:  row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRun::into_record).transpose()
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn fingerprint_of(&self, post_id: &str) -> Result<Option<Fingerprint>> {
    let id = post_id.to_owned();
    let key: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT fingerprint FROM title_fingerprints WHERE id = ?1",
              rusqlite::params![id],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(key.map(Fingerprint::new))
  }

  async fn fingerprint_stats(
    &self,
    query: &FingerprintQuery,
  ) -> Result<Vec<FingerprintStats>> {
    // Column names come from a closed enum, never from caller text.
    let column = query.order_by.as_str();
    let sql = format!(
      "SELECT fingerprint, appearances, unique_subreddits, peak_score, time_to_peak_s
       FROM fingerprint_stats
       WHERE ?1 IS NULL OR peak_score > ?1
       ORDER BY {column} IS NULL, {column} {dir}, fingerprint ASC
       LIMIT ?2",
      dir = query.order.as_sql(),
    );
    let min_peak = query.min_peak_score;
    let limit    = encode_limit(query.limit);

    let raws: Vec<RawFingerprintStats> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![min_peak, limit], RawFingerprintStats::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFingerprintStats::into_stats).collect()
  }

  async fn adoption_stats(
    &self,
    query: &AdoptionQuery,
  ) -> Result<Vec<SubredditAdoptionStats>> {
    let column = query.order_by.as_str();
    let sql = format!(
      "SELECT subreddit, unique_fingerprints, originated_count,
              avg_adoption_delay_hours, total_posts, avg_best_score,
              originator_rate_pct
       FROM subreddit_adoption_stats
       WHERE ?1 IS NULL OR unique_fingerprints >= ?1
       ORDER BY {column} IS NULL, {column} {dir}, subreddit ASC
       LIMIT ?2",
      dir = query.order.as_sql(),
    );
    let min_fps = query.min_unique_fingerprints.map(encode_count);
    let limit   = encode_limit(query.limit);

    let raws: Vec<RawAdoptionStats> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![min_fps, limit], RawAdoptionStats::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAdoptionStats::into_stats).collect()
  }

  async fn image_mutations(&self, limit: Option<usize>) -> Result<Vec<ImageMutation>> {
    let limit = encode_limit(limit);

    let raws: Vec<RawImageMutation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT url, distinct_captions, first_seen, total_posts
           FROM image_mutations
           ORDER BY distinct_captions DESC, total_posts DESC, url ASC
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit], RawImageMutation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawImageMutation::into_mutation).collect()
  }

  async fn timeline(&self, fingerprint: &Fingerprint) -> Result<Vec<TimelineEntry>> {
    let key = fingerprint.as_str().to_owned();

    let entries = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT s.id, s.created_utc, s.score, s.subreddit, s.title, s.url
           FROM title_fingerprints tf
           JOIN staging_image_posts s ON tf.id = s.id
           WHERE tf.fingerprint = ?1
           ORDER BY s.created_utc IS NULL, s.created_utc, s.id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![key], timeline_entry_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(entries)
  }

  async fn posts_for_url(
    &self,
    url: &str,
    limit: Option<usize>,
  ) -> Result<Vec<TimelineEntry>> {
    let url = url.to_owned();
    let limit = encode_limit(limit);

    let entries = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT s.id, s.created_utc, s.score, s.subreddit, s.title, s.url
           FROM staging_image_posts s
           JOIN title_fingerprints tf ON tf.id = s.id
           WHERE s.url = ?1
           ORDER BY s.created_utc IS NULL, s.created_utc, s.id
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![url, limit], timeline_entry_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(entries)
  }
}
