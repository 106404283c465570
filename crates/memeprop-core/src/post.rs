//! Post — the immutable fact observed in the external post store.
//!
//! Posts are append-only and owned upstream. The engine never mutates them;
//! every derived relation is a pure function of a snapshot of posts.

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// A single observed image post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  pub id:          String,
  /// Community the post was made in.
  pub subreddit:   String,
  pub title:       Option<String>,
  /// Image/content locator; a secondary identity signal.
  pub url:         Option<String>,
  /// Popularity snapshot taken at observation time.
  pub score:       i64,
  /// Seconds since the Unix epoch. `None` when the upstream feed had no
  /// timestamp; such posts still count as appearances but are excluded from
  /// every time-based metric.
  pub created_utc: Option<i64>,
}

impl Post {
  pub fn is_timed(&self) -> bool { self.created_utc.is_some() }

  /// Deterministic ordering key for "earliest post": timestamp, then id.
  ///
  /// `None` for untimed posts.
  pub fn chronology_key(&self) -> Option<(i64, &str)> {
    self.created_utc.map(|ts| (ts, self.id.as_str()))
  }
}

/// One post carrying a fingerprint — the unit every aggregator consumes.
#[derive(Debug, Clone, Copy)]
pub struct Appearance<'a> {
  pub post:        &'a Post,
  pub fingerprint: &'a Fingerprint,
}
