//! Caption mutation — the same image reposted under different captions.
//!
//! Groups appearances by their raw image url (so rows join back to the post
//! store on `url`) and keeps only the urls carrying more than one fingerprint.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{fingerprint::Fingerprint, post::Appearance};

/// A row of the `image_mutations` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMutation {
  pub url:               String,
  pub distinct_captions: u64,
  /// Earliest timed post of this image, if any post had a timestamp.
  pub first_seen:        Option<i64>,
  pub total_posts:       u64,
}

#[derive(Default)]
struct UrlGroup<'a> {
  fingerprints: BTreeSet<&'a Fingerprint>,
  first_seen:   Option<i64>,
  total_posts:  u64,
}

/// Detect mutated images, ordered by `distinct_captions` desc, then
/// `total_posts` desc, then url.
pub fn detect(appearances: &[Appearance<'_>]) -> Vec<ImageMutation> {
  let mut groups: BTreeMap<&str, UrlGroup<'_>> = BTreeMap::new();

  for a in appearances {
    let Some(url) = a.post.url.as_deref().filter(|u| !u.trim().is_empty()) else {
      continue;
    };
    let g = groups.entry(url).or_default();
    g.fingerprints.insert(a.fingerprint);
    g.total_posts += 1;
    if let Some(ts) = a.post.created_utc {
      g.first_seen = Some(g.first_seen.map_or(ts, |f| f.min(ts)));
    }
  }

  let mut rows: Vec<ImageMutation> = groups
    .into_iter()
    .filter(|(_, g)| g.fingerprints.len() > 1)
    .map(|(url, g)| ImageMutation {
      url:               url.to_owned(),
      distinct_captions: g.fingerprints.len() as u64,
      first_seen:        g.first_seen,
      total_posts:       g.total_posts,
    })
    .collect();

  rows.sort_by(|a, b| {
    b.distinct_captions
      .cmp(&a.distinct_captions)
      .then_with(|| b.total_posts.cmp(&a.total_posts))
      .then_with(|| a.url.cmp(&b.url))
  });
  rows
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    post::Post,
    testing::{appearances, by_title, post},
  };

  fn on_image(id: &str, title: &str, url: &str, ts: Option<i64>) -> Post {
    Post { url: Some(url.into()), ..post(id, "s", title, 1, ts) }
  }

  #[test]
  fn only_multi_caption_images_are_reported() {
    let posts = vec![
      on_image("1", "drake no", "img1", Some(300)),
      on_image("2", "drake yes", "img1", Some(100)),
      on_image("3", "drake no", "img1", None),
      on_image("4", "stable", "img2", Some(5)),
      on_image("5", "stable", "img2", Some(6)),
      on_image("6", "a", "img3", Some(9)),
      on_image("7", "b", "img3", Some(8)),
      on_image("8", "c", "img3", Some(7)),
    ];
    let fps = by_title(&posts);
    let rows = detect(&appearances(&posts, &fps));

    assert_eq!(rows, vec![
      ImageMutation {
        url:               "img3".into(),
        distinct_captions: 3,
        first_seen:        Some(7),
        total_posts:       3,
      },
      ImageMutation {
        url:               "img1".into(),
        distinct_captions: 2,
        first_seen:        Some(100),
        total_posts:       3,
      },
    ]);
  }

  #[test]
  fn posts_without_url_are_ignored() {
    let mut posts = vec![on_image("1", "x", "img", Some(1)), on_image("2", "y", "img", Some(2))];
    posts[1].url = None;
    let fps = by_title(&posts);
    assert!(detect(&appearances(&posts, &fps)).is_empty());
  }
}
