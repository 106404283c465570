//! Per-fingerprint timelines and their daily score rollup.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
  fingerprint::Fingerprint,
  post::{Appearance, Post},
};

/// One post of a fingerprint's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
  pub id:          String,
  pub created_utc: Option<i64>,
  pub score:       i64,
  pub subreddit:   String,
  pub title:       Option<String>,
  pub url:         Option<String>,
}

impl From<&Post> for TimelineEntry {
  fn from(post: &Post) -> Self {
    Self {
      id:          post.id.clone(),
      created_utc: post.created_utc,
      score:       post.score,
      subreddit:   post.subreddit.clone(),
      title:       post.title.clone(),
      url:         post.url.clone(),
    }
  }
}

/// Total score of a fingerprint's posts within one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyScore {
  pub day:         NaiveDate,
  pub total_score: i64,
  pub posts:       u64,
}

/// Chronological order: timed posts first by timestamp, untimed last; ids
/// break ties.
pub fn sort_entries(entries: &mut [TimelineEntry]) {
  entries.sort_by(|a, b| {
    let key = |e: &TimelineEntry| (e.created_utc.is_none(), e.created_utc);
    key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
  });
}

/// The posts carrying `fingerprint`, in chronological order.
pub fn timeline(
  fingerprint: &Fingerprint,
  appearances: &[Appearance<'_>],
) -> Vec<TimelineEntry> {
  let mut entries: Vec<TimelineEntry> = appearances
    .iter()
    .filter(|a| a.fingerprint == fingerprint)
    .map(|a| TimelineEntry::from(a.post))
    .collect();
  sort_entries(&mut entries);
  entries
}

/// Bucket timed entries into UTC days. Untimed entries and timestamps outside
/// chrono's range are skipped.
pub fn daily_scores(entries: &[TimelineEntry]) -> Vec<DailyScore> {
  let mut days: BTreeMap<NaiveDate, (i64, u64)> = BTreeMap::new();
  for e in entries {
    let Some(day) = e
      .created_utc
      .and_then(|ts| DateTime::from_timestamp(ts, 0))
      .map(|dt| dt.date_naive())
    else {
      continue;
    };
    let bucket = days.entry(day).or_default();
    bucket.0 = bucket.0.saturating_add(e.score);
    bucket.1 += 1;
  }

  days
    .into_iter()
    .map(|(day, (total_score, posts))| DailyScore { day, total_score, posts })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{appearances, by_title, post};

  const DAY: i64 = 86_400;

  #[test]
  fn timeline_is_chronological_with_untimed_last() {
    let posts = vec![
      post("3", "A", "m", 1, Some(30)),
      post("9", "B", "other", 1, Some(1)),
      post("1", "B", "m", 2, None),
      post("2", "C", "m", 3, Some(10)),
    ];
    let fps = by_title(&posts);
    let ids: Vec<_> = timeline(&Fingerprint::new("m"), &appearances(&posts, &fps))
      .into_iter()
      .map(|e| e.id)
      .collect();
    assert_eq!(ids, ["2", "3", "1"]);
  }

  #[test]
  fn daily_scores_bucket_by_utc_day() {
    let entries: Vec<TimelineEntry> = [
      post("1", "A", "m", 10, Some(DAY * 3 + 5)),
      post("2", "A", "m", 20, Some(DAY * 3 + 80_000)),
      post("3", "A", "m", 7, Some(DAY * 5)),
      post("4", "A", "m", 100, None),
    ]
    .iter()
    .map(TimelineEntry::from)
    .collect();

    let days = daily_scores(&entries);
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].day, NaiveDate::from_ymd_opt(1970, 1, 4).unwrap());
    assert_eq!(days[0].total_score, 30);
    assert_eq!(days[0].posts, 2);
    assert_eq!(days[1].day, NaiveDate::from_ymd_opt(1970, 1, 6).unwrap());
    assert_eq!(days[1].total_score, 7);
  }
}
