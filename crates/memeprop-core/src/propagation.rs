//! Propagation aggregation — one [`FingerprintStats`] row per fingerprint.
//!
//! Statistics are folded through a [`PropagationAccumulator`] whose `merge`
//! is associative and commutative, so a batch can be split into arbitrary
//! chunks, aggregated independently, and combined without changing the
//! result.

use std::{
  collections::{BTreeMap, BTreeSet},
  thread,
};

use serde::{Deserialize, Serialize};

use crate::{
  fingerprint::Fingerprint,
  post::{Appearance, Post},
};

/// A row of the `fingerprint_stats` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintStats {
  pub fingerprint:       Fingerprint,
  /// Number of posts carrying this fingerprint, timed or not.
  pub appearances:       u64,
  pub unique_subreddits: u64,
  /// Max score over every appearance.
  pub peak_score:        i64,
  /// Seconds from the first timed appearance to the *timed* peak: the timed
  /// appearance with the highest score. When the post holding `peak_score`
  /// is untimed, this measures a lower-scoring post instead.
  ///
  /// `None` when no appearance has a timestamp, or when the interval does not
  /// fit in an `i64`.
  pub time_to_peak_s:    Option<i64>,
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

/// The timed appearance currently holding the peak.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TimedPeak {
  score:       i64,
  created_utc: i64,
  post_id:     String,
}

impl TimedPeak {
  /// Higher score wins; ties go to the earliest post, then the lowest id.
  fn beats(&self, other: &Self) -> bool {
    (other.score, self.created_utc, &self.post_id)
      < (self.score, other.created_utc, &other.post_id)
  }
}

/// Running per-fingerprint state.
#[derive(Debug, Clone, Default)]
pub struct PropagationAccumulator {
  appearances: u64,
  subreddits:  BTreeSet<String>,
  peak_score:  Option<i64>,
  first_seen:  Option<i64>,
  timed_peak:  Option<TimedPeak>,
}

impl PropagationAccumulator {
  pub fn observe(&mut self, post: &Post) {
    self.appearances += 1;
    if !self.subreddits.contains(&post.subreddit) {
      self.subreddits.insert(post.subreddit.clone());
    }
    self.peak_score = Some(self.peak_score.map_or(post.score, |p| p.max(post.score)));

    if let Some(ts) = post.created_utc {
      self.first_seen = Some(self.first_seen.map_or(ts, |f| f.min(ts)));
      self.offer_peak(TimedPeak {
        score:       post.score,
        created_utc: ts,
        post_id:     post.id.clone(),
      });
    }
  }

  pub fn merge(&mut self, other: Self) {
    self.appearances += other.appearances;
    self.subreddits.extend(other.subreddits);
    self.peak_score = match (self.peak_score, other.peak_score) {
      (Some(a), Some(b)) => Some(a.max(b)),
      (a, b) => a.or(b),
    };
    self.first_seen = match (self.first_seen, other.first_seen) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (a, b) => a.or(b),
    };
    if let Some(peak) = other.timed_peak {
      self.offer_peak(peak);
    }
  }

  fn offer_peak(&mut self, candidate: TimedPeak) {
    match &self.timed_peak {
      Some(current) if !candidate.beats(current) => {}
      _ => self.timed_peak = Some(candidate),
    }
  }

  /// Produce the final row. `None` if nothing was ever observed.
  pub fn finish(self, fingerprint: Fingerprint) -> Option<FingerprintStats> {
    let peak_score = self.peak_score?;
    let time_to_peak_s = match (self.first_seen, &self.timed_peak) {
      (Some(first), Some(peak)) => peak.created_utc.checked_sub(first),
      _ => None,
    };

    Some(FingerprintStats {
      fingerprint,
      appearances: self.appearances,
      unique_subreddits: self.subreddits.len() as u64,
      peak_score,
      time_to_peak_s,
    })
  }
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

type Partial<'a> = BTreeMap<&'a Fingerprint, PropagationAccumulator>;

fn fold<'a>(appearances: &[Appearance<'a>]) -> Partial<'a> {
  let mut groups = Partial::new();
  for a in appearances {
    groups.entry(a.fingerprint).or_default().observe(a.post);
  }
  groups
}

fn finish_all(groups: Partial<'_>) -> Vec<FingerprintStats> {
  groups
    .into_iter()
    .filter_map(|(fp, acc)| acc.finish(fp.clone()))
    .collect()
}

/// Group appearances by fingerprint and compute one row per group, ordered by
/// fingerprint.
pub fn aggregate(appearances: &[Appearance<'_>]) -> Vec<FingerprintStats> {
  finish_all(fold(appearances))
}

/// Like [`aggregate`], but folds `workers` chunks on scoped threads and
/// merges the partial results. The output is identical for any `workers`.
pub fn aggregate_partitioned(
  appearances: &[Appearance<'_>],
  workers: usize,
) -> Vec<FingerprintStats> {
  if workers <= 1 || appearances.len() < 2 {
    return aggregate(appearances);
  }

  let chunk_size = appearances.len().div_ceil(workers);
  let partials: Vec<Partial<'_>> = thread::scope(|scope| {
    let handles: Vec<_> = appearances
      .chunks(chunk_size)
      .map(|chunk| scope.spawn(move || fold(chunk)))
      .collect();
    handles
      .into_iter()
      .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
      .collect()
  });

  let mut merged = Partial::new();
  for partial in partials {
    for (fp, acc) in partial {
      merged.entry(fp).or_default().merge(acc);
    }
  }
  finish_all(merged)
}
