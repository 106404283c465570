//! Encoding and decoding helpers between memeprop domain types and the plain
//! SQLite column representations.
//!
//! Counts are stored as `INTEGER` (i64), averages as `REAL`, run timestamps as
//! RFC 3339 strings and run diagnostics as compact JSON. Fingerprints are
//! stored as their key text.

use chrono::{DateTime, Utc};
use memeprop_core::{
  adoption::SubredditAdoptionStats,
  batch::Diagnostics,
  fingerprint::Fingerprint,
  mutation::ImageMutation,
  post::Post,
  propagation::FingerprintStats,
  store::RunRecord,
  timeline::TimelineEntry,
};

use crate::{Error, Result};

// ─── Counts ──────────────────────────────────────────────────────────────────

pub fn encode_count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

pub fn decode_count(column: &'static str, value: i64) -> Result<u64> {
  u64::try_from(value).map_err(|_| Error::Decode { column, value })
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// A `staging_image_posts` row. Every column maps to a SQLite-native type, so
/// this doubles as the domain type.
pub fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
  Ok(Post {
    id:          row.get(0)?,
    subreddit:   row.get(1)?,
    title:       row.get(2)?,
    url:         row.get(3)?,
    score:       row.get(4)?,
    created_utc: row.get(5)?,
  })
}

pub fn timeline_entry_from_row(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<TimelineEntry> {
  Ok(TimelineEntry {
    id:          row.get(0)?,
    created_utc: row.get(1)?,
    score:       row.get(2)?,
    subreddit:   row.get(3)?,
    title:       row.get(4)?,
    url:         row.get(5)?,
  })
}

/// Raw values of a `fingerprint_stats` row.
pub struct RawFingerprintStats {
  pub fingerprint:       String,
  pub appearances:       i64,
  pub unique_subreddits: i64,
  pub peak_score:        i64,
  pub time_to_peak_s:    Option<i64>,
}

impl RawFingerprintStats {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fingerprint:       row.get(0)?,
      appearances:       row.get(1)?,
      unique_subreddits: row.get(2)?,
      peak_score:        row.get(3)?,
      time_to_peak_s:    row.get(4)?,
    })
  }

  pub fn into_stats(self) -> Result<FingerprintStats> {
    Ok(FingerprintStats {
      fingerprint:       Fingerprint::new(self.fingerprint),
      appearances:       decode_count("appearances", self.appearances)?,
      unique_subreddits: decode_count("unique_subreddits", self.unique_subreddits)?,
      peak_score:        self.peak_score,
      time_to_peak_s:    self.time_to_peak_s,
    })
  }
}

impl From<&FingerprintStats> for RawFingerprintStats {
  fn from(s: &FingerprintStats) -> Self {
    Self {
      fingerprint:       s.fingerprint.as_str().to_owned(),
      appearances:       encode_count(s.appearances),
      unique_subreddits: encode_count(s.unique_subreddits),
      peak_score:        s.peak_score,
      time_to_peak_s:    s.time_to_peak_s,
    }
  }
}

/// Raw values of a `subreddit_adoption_stats` row.
pub struct RawAdoptionStats {
  pub subreddit:                String,
  pub unique_fingerprints:      i64,
  pub originated_count:         i64,
  pub avg_adoption_delay_hours: Option<f64>,
  pub total_posts:              i64,
  pub avg_best_score:           f64,
  pub originator_rate_pct:      f64,
}

impl RawAdoptionStats {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subreddit:                row.get(0)?,
      unique_fingerprints:      row.get(1)?,
      originated_count:         row.get(2)?,
      avg_adoption_delay_hours: row.get(3)?,
      total_posts:              row.get(4)?,
      avg_best_score:           row.get(5)?,
      originator_rate_pct:      row.get(6)?,
    })
  }

  pub fn into_stats(self) -> Result<SubredditAdoptionStats> {
    Ok(SubredditAdoptionStats {
      subreddit:                self.subreddit,
      unique_fingerprints:      decode_count("unique_fingerprints", self.unique_fingerprints)?,
      originated_count:         decode_count("originated_count", self.originated_count)?,
      avg_adoption_delay_hours: self.avg_adoption_delay_hours,
      total_posts:              decode_count("total_posts", self.total_posts)?,
      avg_best_score:           self.avg_best_score,
      originator_rate_pct:      self.originator_rate_pct,
    })
  }
}

impl From<&SubredditAdoptionStats> for RawAdoptionStats {
  fn from(s: &SubredditAdoptionStats) -> Self {
    Self {
      subreddit:                s.subreddit.clone(),
      unique_fingerprints:      encode_count(s.unique_fingerprints),
      originated_count:         encode_count(s.originated_count),
      avg_adoption_delay_hours: s.avg_adoption_delay_hours,
      total_posts:              encode_count(s.total_posts),
      avg_best_score:           s.avg_best_score,
      originator_rate_pct:      s.originator_rate_pct,
    }
  }
}

/// Raw values of an `image_mutations` row.
pub struct RawImageMutation {
  pub url:               String,
  pub distinct_captions: i64,
  pub first_seen:        Option<i64>,
  pub total_posts:       i64,
}

impl RawImageMutation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      url:               row.get(0)?,
      distinct_captions: row.get(1)?,
      first_seen:        row.get(2)?,
      total_posts:       row.get(3)?,
    })
  }

  pub fn into_mutation(self) -> Result<ImageMutation> {
    Ok(ImageMutation {
      url:               self.url,
      distinct_captions: decode_count("distinct_captions", self.distinct_captions)?,
      first_seen:        self.first_seen,
      total_posts:       decode_count("total_posts", self.total_posts)?,
    })
  }
}

impl From<&ImageMutation> for RawImageMutation {
  fn from(m: &ImageMutation) -> Self {
    Self {
      url:               m.url.clone(),
      distinct_captions: encode_count(m.distinct_captions),
      first_seen:        m.first_seen,
      total_posts:       encode_count(m.total_posts),
    }
  }
}

/// Raw values of an `analysis_runs` row.
pub struct RawRun {
  pub run_id:       i64,
  pub completed_at: String,
  pub diagnostics:  String,
}

impl RawRun {
  pub fn into_record(self) -> Result<RunRecord> {
    Ok(RunRecord {
      run_id:       self.run_id,
      completed_at: decode_dt(&self.completed_at)?,
      diagnostics:  Diagnostics::from_json(&self.diagnostics)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_counts_do_not_decode() {
    assert!(matches!(
      decode_count("appearances", -1),
      Err(Error::Decode { column: "appearances", value: -1 })
    ));
    assert_eq!(decode_count("appearances", 7).unwrap(), 7);
  }

  #[test]
  fn datetime_survives_the_text_column() {
    let now = Utc::now();
    assert_eq!(decode_dt(&encode_dt(now)).unwrap(), now);
    assert!(decode_dt("yesterday").is_err());
  }
}
