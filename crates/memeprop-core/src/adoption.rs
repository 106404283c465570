//! Adoption analysis — which communities originate memes and which adopt
//! them, and how far behind the adopters are.
//!
//! For every fingerprint the *originator* is the subreddit holding the
//! globally earliest timed post (ties broken by lowest post id). Every other
//! subreddit that posted the fingerprint with a timestamp is an *adopter*,
//! lagging by the gap between the global first post and its own first post.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, fingerprint::Fingerprint, post::Appearance};

/// Default minimum number of appearances a fingerprint needs before its
/// adoption delays count towards a subreddit's average.
pub const DEFAULT_MIN_APPEARANCES: u32 = 3;

const SECONDS_PER_HOUR: f64 = 3600.0;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptionConfig {
  /// Fingerprints with fewer appearances are left out of
  /// `avg_adoption_delay_hours`. Every other metric still counts them.
  pub min_appearances: u32,
}

impl Default for AdoptionConfig {
  fn default() -> Self {
    Self { min_appearances: DEFAULT_MIN_APPEARANCES }
  }
}

impl AdoptionConfig {
  pub fn validate(&self) -> Result<()> {
    if self.min_appearances == 0 {
      return Err(Error::InvalidConfig(
        "min_appearances must be at least 1".into(),
      ));
    }
    Ok(())
  }
}

// ─── Output row ──────────────────────────────────────────────────────────────

/// A row of the `subreddit_adoption_stats` relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditAdoptionStats {
  pub subreddit:                String,
  pub unique_fingerprints:      u64,
  pub originated_count:         u64,
  /// Mean lag, in hours, over the fingerprints this subreddit adopted.
  /// `None` when it never adopted a fingerprint with enough support.
  pub avg_adoption_delay_hours: Option<f64>,
  pub total_posts:              u64,
  /// Mean over this subreddit's fingerprints of its own best score for each.
  pub avg_best_score:           f64,
  pub originator_rate_pct:      f64,
}

// ─── Grouping ────────────────────────────────────────────────────────────────

/// One subreddit's footprint within a single fingerprint group.
#[derive(Debug, Clone, Copy)]
struct Presence {
  posts:      u64,
  best_score: i64,
  first_seen: Option<i64>,
}

#[derive(Debug, Default)]
struct Group<'a> {
  appearances: u64,
  /// `(created_utc, post_id, subreddit)` of the earliest timed post.
  origin:      Option<(i64, &'a str, &'a str)>,
  presence:    BTreeMap<&'a str, Presence>,
}

impl<'a> Group<'a> {
  fn observe(&mut self, a: &Appearance<'a>) {
    let post = a.post;
    self.appearances += 1;

    if let Some((ts, id)) = post.chronology_key() {
      let candidate = (ts, id, post.subreddit.as_str());
      match self.origin {
        Some((t, i, _)) if (t, i) <= (ts, id) => {}
        _ => self.origin = Some(candidate),
      }
    }

    self
      .presence
      .entry(post.subreddit.as_str())
      .and_modify(|p| {
        p.posts += 1;
        p.best_score = p.best_score.max(post.score);
        p.first_seen = match (p.first_seen, post.created_utc) {
          (Some(a), Some(b)) => Some(a.min(b)),
          (a, b) => a.or(b),
        };
      })
      .or_insert(Presence {
        posts:      1,
        best_score: post.score,
        first_seen: post.created_utc,
      });
  }
}

#[derive(Debug, Default)]
struct Rollup {
  unique_fingerprints: u64,
  originated_count:    u64,
  total_posts:         u64,
  best_score_sum:      f64,
  delay_hours_sum:     f64,
  adopted_count:       u64,
}

impl Rollup {
  fn finish(self, subreddit: &str) -> Option<SubredditAdoptionStats> {
    if self.unique_fingerprints == 0 {
      return None;
    }
    let fingerprints = self.unique_fingerprints as f64;
    let avg_adoption_delay_hours = (self.adopted_count > 0)
      .then(|| self.delay_hours_sum / self.adopted_count as f64);

    Some(SubredditAdoptionStats {
      subreddit: subreddit.to_owned(),
      unique_fingerprints: self.unique_fingerprints,
      originated_count: self.originated_count,
      avg_adoption_delay_hours,
      total_posts: self.total_posts,
      avg_best_score: self.best_score_sum / fingerprints,
      originator_rate_pct: self.originated_count as f64 / fingerprints * 100.0,
    })
  }
}

// ─── Analysis ────────────────────────────────────────────────────────────────

/// The originating subreddit of every fingerprint that has a timed post.
pub fn originators<'a>(
  appearances: &[Appearance<'a>],
) -> BTreeMap<&'a Fingerprint, &'a str> {
  group(appearances)
    .into_iter()
    .filter_map(|(fp, g)| g.origin.map(|(_, _, subreddit)| (fp, subreddit)))
    .collect()
}

fn group<'a>(appearances: &[Appearance<'a>]) -> BTreeMap<&'a Fingerprint, Group<'a>> {
  let mut groups: BTreeMap<&Fingerprint, Group<'_>> = BTreeMap::new();
  for a in appearances {
    groups.entry(a.fingerprint).or_default().observe(a);
  }
  groups
}

/// Compute one row per subreddit, ordered by subreddit.
pub fn analyze(
  appearances: &[Appearance<'_>],
  config: &AdoptionConfig,
) -> Vec<SubredditAdoptionStats> {
  analyze_counted(appearances, config).0
}

/// [`analyze`], plus the number of adoption delays left out because the gap
/// between the two timestamps does not fit in an `i64`.
pub(crate) fn analyze_counted(
  appearances: &[Appearance<'_>],
  config: &AdoptionConfig,
) -> (Vec<SubredditAdoptionStats>, usize) {
  let mut rollups: BTreeMap<&str, Rollup> = BTreeMap::new();
  let mut overflowed = 0;

  for (_, g) in group(appearances) {
    let supported = g.appearances >= u64::from(config.min_appearances);
    let origin = g.origin;

    for (subreddit, presence) in g.presence {
      let r = rollups.entry(subreddit).or_default();
      r.unique_fingerprints += 1;
      r.total_posts += presence.posts;
      r.best_score_sum += presence.best_score as f64;

      let Some((origin_ts, _, origin_sub)) = origin else { continue };
      if origin_sub == subreddit {
        r.originated_count += 1;
      } else if let (true, Some(first)) = (supported, presence.first_seen) {
        let Some(delay) = first.checked_sub(origin_ts) else {
          overflowed += 1;
          continue;
        };
        r.delay_hours_sum += delay as f64 / SECONDS_PER_HOUR;
        r.adopted_count += 1;
      }
    }
  }

  let rows = rollups
    .into_iter()
    .filter_map(|(subreddit, r)| r.finish(subreddit))
    .collect();
  (rows, overflowed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{appearances, by_title, post};

  fn row<'a>(rows: &'a [SubredditAdoptionStats], sub: &str) -> &'a SubredditAdoptionStats {
    rows.iter().find(|r| r.subreddit == sub).expect("subreddit present")
  }

  #[test]
  fn catmeme_scenario() {
    let posts = vec![
      post("1", "A", "catmeme", 10, Some(1000)),
      post("2", "B", "catmeme", 50, Some(1100)),
      post("3", "A", "catmeme", 5, Some(1500)),
    ];
    let fps = by_title(&posts);
    let rows = analyze(&appearances(&posts, &fps), &AdoptionConfig::default());

    let a = row(&rows, "A");
    assert_eq!(a.originated_count, 1);
    assert_eq!(a.unique_fingerprints, 1);
    assert_eq!(a.total_posts, 2);
    assert_eq!(a.avg_best_score, 10.0);
    assert_eq!(a.originator_rate_pct, 100.0);
    assert_eq!(a.avg_adoption_delay_hours, None);

    let b = row(&rows, "B");
    assert_eq!(b.originated_count, 0);
    assert_eq!(b.originator_rate_pct, 0.0);
    let delay = b.avg_adoption_delay_hours.expect("B adopted catmeme");
    assert!((delay - 100.0 / 3600.0).abs() < 1e-9);
  }

  #[test]
  fn origin_ties_break_on_lowest_post_id() {
    let posts = vec![
      post("b2", "Late", "tie", 1, Some(500)),
      post("a1", "Early", "tie", 1, Some(500)),
    ];
    let fps = by_title(&posts);
    let apps = appearances(&posts, &fps);

    let origins = originators(&apps);
    assert_eq!(origins[&fps[0].1], "Early");

    let rows = analyze(&apps, &AdoptionConfig { min_appearances: 1 });
    assert_eq!(row(&rows, "Early").originated_count, 1);
    assert_eq!(row(&rows, "Late").avg_adoption_delay_hours, Some(0.0));
  }

  #[test]
  fn min_appearances_only_filters_delays() {
    let posts = vec![
      post("1", "A", "small", 10, Some(0)),
      post("2", "B", "small", 20, Some(7200)),
      post("3", "A", "big", 1, Some(0)),
      post("4", "B", "big", 2, Some(3600)),
      post("5", "C", "big", 3, Some(3600)),
    ];
    let fps = by_title(&posts);
    let rows = analyze(&appearances(&posts, &fps), &AdoptionConfig::default());

    let b = row(&rows, "B");
    assert_eq!(b.unique_fingerprints, 2);
    assert_eq!(b.total_posts, 2);
    assert_eq!(b.avg_best_score, 11.0);
    // Only `big` has three appearances.
    assert_eq!(b.avg_adoption_delay_hours, Some(1.0));

    let a = row(&rows, "A");
    assert_eq!(a.originated_count, 2);
    assert_eq!(a.originator_rate_pct, 100.0);

    let loose = analyze(
      &appearances(&posts, &fps),
      &AdoptionConfig { min_appearances: 1 },
    );
    assert_eq!(row(&loose, "B").avg_adoption_delay_hours, Some(1.5));
  }

  #[test]
  fn adopter_delay_uses_its_own_earliest_post() {
    let posts = vec![
      post("1", "A", "m", 1, Some(0)),
      post("2", "B", "m", 1, Some(36_000)),
      post("3", "B", "m", 1, Some(18_000)),
    ];
    let fps = by_title(&posts);
    let rows = analyze(&appearances(&posts, &fps), &AdoptionConfig::default());
    assert_eq!(row(&rows, "B").avg_adoption_delay_hours, Some(5.0));
  }

  #[test]
  fn untimed_posts_count_but_never_originate() {
    let posts = vec![
      post("1", "A", "m", 100, None),
      post("2", "B", "m", 5, Some(1000)),
      post("3", "C", "m", 1, Some(4600)),
      post("4", "D", "ghost", 9, None),
    ];
    let fps = by_title(&posts);
    let rows = analyze(&appearances(&posts, &fps), &AdoptionConfig::default());

    let a = row(&rows, "A");
    assert_eq!(a.total_posts, 1);
    assert_eq!(a.originated_count, 0);
    assert_eq!(a.avg_adoption_delay_hours, None);
    assert_eq!(a.avg_best_score, 100.0);

    assert_eq!(row(&rows, "B").originated_count, 1);
    assert_eq!(row(&rows, "C").avg_adoption_delay_hours, Some(1.0));

    // A fingerprint with no timed post credits no originator.
    let d = row(&rows, "D");
    assert_eq!(d.originated_count, 0);
    assert_eq!(d.unique_fingerprints, 1);
  }

  #[test]
  fn origination_is_exclusive_and_rates_are_bounded() {
    let posts: Vec<_> = (0..60)
      .map(|i| {
        let title = ["a", "b", "c", "d", "e"][i % 5];
        let ts = Some(((i * 53) % 17) as i64);
        post(&format!("{i:03}"), &format!("s{}", (i * 7) % 4), title, i as i64, ts)
      })
      .collect();
    let fps = by_title(&posts);
    let apps = appearances(&posts, &fps);
    let rows = analyze(&apps, &AdoptionConfig::default());

    let credited: u64 = rows.iter().map(|r| r.originated_count).sum();
    assert_eq!(credited, 5);
    assert_eq!(originators(&apps).len(), 5);

    for r in &rows {
      assert!((0.0..=100.0).contains(&r.originator_rate_pct));
      assert_eq!(
        r.originator_rate_pct == 100.0,
        r.originated_count == r.unique_fingerprints
      );
    }
  }

  #[test]
  fn delay_wider_than_i64_is_left_out() {
    let posts = vec![
      post("1", "A", "m", 1, Some(i64::MIN)),
      post("2", "B", "m", 9, Some(i64::MAX)),
      // -1 - i64::MIN == i64::MAX still fits.
      post("3", "C", "m", 1, Some(-1)),
    ];
    let fps = by_title(&posts);
    let (rows, overflowed) =
      analyze_counted(&appearances(&posts, &fps), &AdoptionConfig::default());

    assert_eq!(overflowed, 1);
    assert_eq!(row(&rows, "A").originated_count, 1);
    assert_eq!(row(&rows, "B").avg_adoption_delay_hours, None);
    assert_eq!(row(&rows, "B").unique_fingerprints, 1);
    let c = row(&rows, "C").avg_adoption_delay_hours.expect("C adopted m");
    assert!(c > 0.0);
  }

  #[test]
  fn zero_min_appearances_is_rejected() {
    assert!(AdoptionConfig { min_appearances: 0 }.validate().is_err());
    assert!(AdoptionConfig::default().validate().is_ok());
  }
}
