//! The `PropagationStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `memeprop-store-sqlite`).
//! It reads the external post store and persists the derived relations so
//! downstream reporting can query them by column name.

use std::{fmt, future::Future, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  adoption::SubredditAdoptionStats,
  batch::{Analysis, Diagnostics},
  fingerprint::Fingerprint,
  mutation::ImageMutation,
  post::Post,
  propagation::FingerprintStats,
  timeline::TimelineEntry,
};

// ─── Sorting ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  #[default]
  Desc,
}

impl SortOrder {
  pub fn as_sql(self) -> &'static str {
    match self {
      Self::Asc => "ASC",
      Self::Desc => "DESC",
    }
  }
}

/// Declares a column enum whose variants map 1:1 onto relation column names.
macro_rules! columns {
  (
    $(#[$meta:meta])*
    $name:ident, $relation:literal, default = $default:ident,
    { $($variant:ident => $column:literal),+ $(,)? }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum $name {
      $($variant,)+
    }

    impl $name {
      pub const ALL: &'static [Self] = &[$(Self::$variant),+];

      pub fn as_str(self) -> &'static str {
        match self {
          $(Self::$variant => $column,)+
        }
      }
    }

    impl Default for $name {
      fn default() -> Self { Self::$default }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl FromStr for $name {
      type Err = Error;

      fn from_str(s: &str) -> Result<Self, Error> {
        match s {
          $($column => Ok(Self::$variant),)+
          other => Err(Error::UnknownColumn {
            relation: $relation,
            column:   other.to_owned(),
          }),
        }
      }
    }
  };
}

columns! {
  /// A sortable column of `fingerprint_stats`.
  FingerprintColumn, "fingerprint_stats", default = Appearances, {
    Fingerprint      => "fingerprint",
    Appearances      => "appearances",
    UniqueSubreddits => "unique_subreddits",
    PeakScore        => "peak_score",
    TimeToPeakS      => "time_to_peak_s",
  }
}

columns! {
  /// A sortable column of `subreddit_adoption_stats`.
  AdoptionColumn, "subreddit_adoption_stats", default = OriginatedCount, {
    Subreddit             => "subreddit",
    UniqueFingerprints    => "unique_fingerprints",
    OriginatedCount       => "originated_count",
    AvgAdoptionDelayHours => "avg_adoption_delay_hours",
    TotalPosts            => "total_posts",
    AvgBestScore          => "avg_best_score",
    OriginatorRatePct     => "originator_rate_pct",
  }
}

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`PropagationStore::fingerprint_stats`].
///
/// Rows with a null sort value always come last; ties fall back to the
/// fingerprint so the order is total.
#[derive(Debug, Clone, Default)]
pub struct FingerprintQuery {
  pub order_by:       FingerprintColumn,
  pub order:          SortOrder,
  /// Only rows with `peak_score` strictly greater than this.
  pub min_peak_score: Option<i64>,
  pub limit:          Option<usize>,
}

/// Parameters for [`PropagationStore::adoption_stats`].
#[derive(Debug, Clone, Default)]
pub struct AdoptionQuery {
  pub order_by:                AdoptionColumn,
  pub order:                   SortOrder,
  pub min_unique_fingerprints: Option<u64>,
  pub limit:                   Option<usize>,
}

/// A completed, persisted analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
  pub run_id:       i64,
  pub completed_at: DateTime<Utc>,
  pub diagnostics:  Diagnostics,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a memeprop storage backend.
///
/// Posts are append-only and owned upstream. The derived relations are
/// snapshots: [`materialize`](Self::materialize) replaces all of them at once.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait PropagationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Post store ────────────────────────────────────────────────────────

  /// Append posts to the post store. Returns how many rows were written.
  /// A post id that already exists is an error and nothing is written.
  fn stage_posts(
    &self,
    posts: Vec<Post>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Load the complete post snapshot, ordered by id.
  fn load_posts(
    &self,
  ) -> impl Future<Output = Result<Vec<Post>, Self::Error>> + Send + '_;

  // ── Derived relations ─────────────────────────────────────────────────

  /// Atomically replace every derived relation with `analysis` and record
  /// the run.
  fn materialize<'a>(
    &'a self,
    analysis: &'a Analysis,
  ) -> impl Future<Output = Result<RunRecord, Self::Error>> + Send + 'a;

  /// The most recent run, if any.
  fn last_run(
    &self,
  ) -> impl Future<Output = Result<Option<RunRecord>, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// The fingerprint assigned to `post_id`, if it was fingerprintable.
  fn fingerprint_of<'a>(
    &'a self,
    post_id: &'a str,
  ) -> impl Future<Output = Result<Option<Fingerprint>, Self::Error>> + Send + 'a;

  fn fingerprint_stats<'a>(
    &'a self,
    query: &'a FingerprintQuery,
  ) -> impl Future<Output = Result<Vec<FingerprintStats>, Self::Error>> + Send + 'a;

  fn adoption_stats<'a>(
    &'a self,
    query: &'a AdoptionQuery,
  ) -> impl Future<Output = Result<Vec<SubredditAdoptionStats>, Self::Error>> + Send + 'a;

  /// Mutated images in report order (most captions first).
  fn image_mutations(
    &self,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<ImageMutation>, Self::Error>> + Send + '_;

  /// The posts of one fingerprint, joined back to the post store, in
  /// chronological order.
  fn timeline<'a>(
    &'a self,
    fingerprint: &'a Fingerprint,
  ) -> impl Future<Output = Result<Vec<TimelineEntry>, Self::Error>> + Send + 'a;

  /// Fingerprinted posts of one image url, in chronological order. Pairs
  /// with [`image_mutations`](Self::image_mutations) to show the captions.
  fn posts_for_url<'a>(
    &'a self,
    url: &'a str,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<TimelineEntry>, Self::Error>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn columns_parse_their_relation_names() {
    for col in FingerprintColumn::ALL {
      assert_eq!(col.as_str().parse::<FingerprintColumn>().unwrap(), *col);
    }
    for col in AdoptionColumn::ALL {
      assert_eq!(col.as_str().parse::<AdoptionColumn>().unwrap(), *col);
    }
  }

  #[test]
  fn unknown_column_names_the_relation() {
    let err = "score; DROP TABLE x".parse::<FingerprintColumn>().unwrap_err();
    assert!(err.to_string().contains("fingerprint_stats"));
  }

  #[test]
  fn defaults_match_the_usual_reports() {
    assert_eq!(FingerprintQuery::default().order_by, FingerprintColumn::Appearances);
    assert_eq!(AdoptionQuery::default().order_by, AdoptionColumn::OriginatedCount);
    assert_eq!(SortOrder::default(), SortOrder::Desc);
  }
}
