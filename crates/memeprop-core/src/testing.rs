//! Fixture helpers shared by the unit tests in this crate.

use crate::{
  fingerprint::Fingerprint,
  post::{Appearance, Post},
};

pub fn post(
  id: &str,
  subreddit: &str,
  title: &str,
  score: i64,
  created_utc: Option<i64>,
) -> Post {
  Post {
    id:          id.into(),
    subreddit:   subreddit.into(),
    title:       Some(title.into()),
    url:         Some(format!("https://i.example.com/{title}.jpg")),
    score,
    created_utc,
  }
}

/// Pair each post with the fingerprint named by its title.
pub fn by_title(posts: &[Post]) -> Vec<(usize, Fingerprint)> {
  posts
    .iter()
    .enumerate()
    .map(|(i, p)| (i, Fingerprint::new(p.title.clone().unwrap_or_default())))
    .collect()
}

pub fn appearances<'a>(
  posts: &'a [Post],
  fps: &'a [(usize, Fingerprint)],
) -> Vec<Appearance<'a>> {
  fps
    .iter()
    .map(|(i, fp)| Appearance { post: &posts[*i], fingerprint: fp })
    .collect()
}
