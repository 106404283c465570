//! Batch driver — one full, idempotent recomputation over a post snapshot.
//!
//! Every derived relation is rebuilt from scratch on each run; nothing is
//! maintained incrementally between runs. The only batch-level failure is a
//! duplicate post id, which signals a broken upstream feed. Everything else
//! (unfingerprintable posts, missing timestamps) is local to the record and
//! surfaces in [`Diagnostics`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  adoption::{self, AdoptionConfig, SubredditAdoptionStats},
  fingerprint::{self, FingerprintAssignment, FingerprintPolicy, PolicyKind, RejectReason},
  mutation::{self, ImageMutation},
  post::Post,
  propagation::{self, FingerprintStats},
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
  pub policy:   PolicyKind,
  pub adoption: AdoptionConfig,
  /// Threads used by the propagation aggregator. `1` runs inline.
  pub workers:  usize,
}

impl Default for AnalysisConfig {
  fn default() -> Self {
    Self {
      policy:   PolicyKind::default(),
      adoption: AdoptionConfig::default(),
      workers:  1,
    }
  }
}

impl AnalysisConfig {
  pub fn validate(&self) -> Result<()> {
    self.adoption.validate()?;
    if self.workers == 0 {
      return Err(Error::InvalidConfig("workers must be at least 1".into()));
    }
    Ok(())
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Diagnostic counters for one run. Never part of the output relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
  pub total_posts:                usize,
  pub fingerprinted_posts:        usize,
  /// Posts routed to the unfingerprintable bucket, by reason.
  pub rejected:                   BTreeMap<RejectReason, usize>,
  /// Fingerprinted posts without `created_utc`: counted in appearances and
  /// totals, excluded from time-based metrics.
  pub untimed_posts:              usize,
  pub fingerprints:               usize,
  /// Fingerprints below the adoption `min_appearances` threshold.
  pub below_support_fingerprints: usize,
  /// Time-to-peak and adoption-delay intervals too wide for `i64` seconds.
  /// The affected metric is left absent; the rest of the row still counts.
  #[serde(default)]
  pub overflowed_intervals:       usize,
}

impl Diagnostics {
  pub fn rejected_total(&self) -> usize { self.rejected.values().sum() }

  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string(self)?) }

  pub fn from_json(s: &str) -> Result<Self> { Ok(serde_json::from_str(s)?) }
}

/// Every derived relation produced by one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
  /// `title_fingerprints`, in input order.
  pub assignments:       Vec<FingerprintAssignment>,
  /// `fingerprint_stats`, ordered by fingerprint.
  pub fingerprint_stats: Vec<FingerprintStats>,
  /// `subreddit_adoption_stats`, ordered by subreddit.
  pub adoption_stats:    Vec<SubredditAdoptionStats>,
  pub image_mutations:   Vec<ImageMutation>,
  pub diagnostics:       Diagnostics,
}

// ─── Driver ──────────────────────────────────────────────────────────────────

fn check_unique_ids(posts: &[Post]) -> Result<()> {
  let mut seen: HashSet<&str> = HashSet::with_capacity(posts.len());
  for post in posts {
    if !seen.insert(post.id.as_str()) {
      tracing::warn!(post_id = %post.id, "duplicate post id; rejecting batch");
      return Err(Error::DuplicatePostId(post.id.clone()));
    }
  }
  Ok(())
}

/// Run the full pipeline with the policy named in `config`.
pub fn analyze(posts: &[Post], config: &AnalysisConfig) -> Result<Analysis> {
  let policy = config.policy.policy();
  analyze_with(posts, policy.as_ref(), config)
}

/// Run the full pipeline with a caller-supplied fingerprint policy.
pub fn analyze_with(
  posts: &[Post],
  policy: &dyn FingerprintPolicy,
  config: &AnalysisConfig,
) -> Result<Analysis> {
  config.validate()?;
  check_unique_ids(posts)?;

  let extraction = fingerprint::extract(posts, policy);
  let appearances = extraction.appearances(posts);
  tracing::debug!(
    fingerprinted = appearances.len(),
    rejected = extraction.rejected_total(),
    "fingerprint extraction done"
  );

  let fingerprint_stats = propagation::aggregate_partitioned(&appearances, config.workers);
  let (adoption_stats, overflowed_delays) =
    adoption::analyze_counted(&appearances, &config.adoption);
  let image_mutations = mutation::detect(&appearances);

  let timed: BTreeSet<_> = appearances
    .iter()
    .filter(|a| a.post.is_timed())
    .map(|a| a.fingerprint)
    .collect();
  let overflowed_peaks = fingerprint_stats
    .iter()
    .filter(|s| s.time_to_peak_s.is_none() && timed.contains(&s.fingerprint))
    .count();

  let min = u64::from(config.adoption.min_appearances);
  let diagnostics = Diagnostics {
    total_posts:                posts.len(),
    fingerprinted_posts:        appearances.len(),
    rejected:                   extraction.rejected.clone(),
    untimed_posts:              appearances.iter().filter(|a| !a.post.is_timed()).count(),
    fingerprints:               fingerprint_stats.len(),
    below_support_fingerprints: fingerprint_stats
      .iter()
      .filter(|s| s.appearances < min)
      .count(),
    overflowed_intervals:       overflowed_peaks + overflowed_delays,
  };

  if diagnostics.rejected_total() > 0 {
    tracing::warn!(
      rejected = diagnostics.rejected_total(),
      "posts routed to the unfingerprintable bucket"
    );
  }
  if diagnostics.overflowed_intervals > 0 {
    tracing::warn!(
      overflowed = diagnostics.overflowed_intervals,
      "timestamp intervals out of range; time metrics left absent"
    );
  }
  tracing::info!(
    posts = diagnostics.total_posts,
    fingerprints = diagnostics.fingerprints,
    subreddits = adoption_stats.len(),
    mutations = image_mutations.len(),
    "analysis complete"
  );

  Ok(Analysis {
    assignments: extraction.assignments,
    fingerprint_stats,
    adoption_stats,
    image_mutations,
    diagnostics,
  })
}
