//! Fingerprint extraction — mapping each post to its "same meme" identity.
//!
//! A fingerprint is a pure function of the post's normalised caption and,
//! depending on the [`PolicyKind`], its image url. Posts that cannot be
//! fingerprinted land in a reserved bucket ([`FingerprintOutcome::Unfingerprintable`])
//! and never reach any output relation.
//!
//! # Caption normalisation
//!
//! [`normalize_caption`] applies these rules, in order:
//!
//! 1. Unicode lower-casing.
//! 2. Removal of bracketed tags such as `[OC]` or `(x-post r/funny)`.
//! 3. Truncation at the first edit marker (`edit:`, `edit -`, `eta:`,
//!    `update:`) that follows some caption text. A leading marker such as
//!    `Update: new template` is kept as ordinary words.
//! 4. Removal of community and user mentions (`r/name`, `/u/name`).
//! 5. Removal of the hyphenated `x-post` / `cross-post` markers.
//! 6. Every non-alphanumeric character becomes a space.
//! 7. Whole boilerplate tokens are dropped ([`BOILERPLATE_TOKENS`]).
//! 8. Whitespace is collapsed to single spaces and trimmed.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
  Error, Result,
  post::{Appearance, Post},
};

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// Identity key shared by every post believed to be the same meme.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn new(key: impl Into<String>) -> Self { Self(key.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A row of the `title_fingerprints` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintAssignment {
  pub post_id:     String,
  pub fingerprint: Fingerprint,
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Why a post was routed to the unfingerprintable bucket.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
  /// Neither a title nor a url was present.
  MissingTitleAndUrl,
  /// The post had input, but nothing usable survived normalisation.
  EmptyCaption,
}

impl RejectReason {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::MissingTitleAndUrl => "missing_title_and_url",
      Self::EmptyCaption => "empty_caption",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintOutcome {
  Assigned(Fingerprint),
  Unfingerprintable(RejectReason),
}

// ─── Policies ────────────────────────────────────────────────────────────────

/// A pluggable "same meme" rule.
///
/// Implementations must be pure: the same post always yields the same outcome,
/// independent of any other post or of scan order.
pub trait FingerprintPolicy: Send + Sync {
  fn fingerprint(&self, post: &Post) -> FingerprintOutcome;
}

/// Selects one of the built-in policies from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
  /// The fingerprint is the normalised caption text itself.
  #[default]
  Caption,
  /// SHA-256 over the normalised image url and the normalised caption.
  CaptionAndUrl,
}

impl PolicyKind {
  pub fn policy(self) -> Box<dyn FingerprintPolicy> {
    match self {
      Self::Caption => Box::new(CaptionPolicy),
      Self::CaptionAndUrl => Box::new(CaptionAndUrlPolicy),
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Caption => "caption",
      Self::CaptionAndUrl => "caption_and_url",
    }
  }
}

impl FromStr for PolicyKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "caption" => Ok(Self::Caption),
      "caption_and_url" => Ok(Self::CaptionAndUrl),
      other => Err(Error::InvalidConfig(format!(
        "unknown fingerprint policy: {other:?}"
      ))),
    }
  }
}

fn has_text(s: &Option<String>) -> bool {
  s.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Text-only identity: posts match when their captions normalise equally.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptionPolicy;

impl FingerprintPolicy for CaptionPolicy {
  fn fingerprint(&self, post: &Post) -> FingerprintOutcome {
    if !has_text(&post.title) && !has_text(&post.url) {
      return FingerprintOutcome::Unfingerprintable(
        RejectReason::MissingTitleAndUrl,
      );
    }
    let caption = post.title.as_deref().map(normalize_caption).unwrap_or_default();
    if caption.is_empty() {
      return FingerprintOutcome::Unfingerprintable(RejectReason::EmptyCaption);
    }
    FingerprintOutcome::Assigned(Fingerprint(caption))
  }
}

/// Image + caption identity.
///
/// A post whose caption normalises to nothing is still fingerprinted on its
/// url alone; only a post with neither signal is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptionAndUrlPolicy;

impl FingerprintPolicy for CaptionAndUrlPolicy {
  fn fingerprint(&self, post: &Post) -> FingerprintOutcome {
    let caption = post
      .title
      .as_deref()
      .map(normalize_caption)
      .filter(|c| !c.is_empty());
    let url = post.url.as_deref().and_then(normalize_url);

    if caption.is_none() && url.is_none() {
      let reason = if has_text(&post.title) {
        RejectReason::EmptyCaption
      } else {
        RejectReason::MissingTitleAndUrl
      };
      return FingerprintOutcome::Unfingerprintable(reason);
    }

    let mut hasher = Sha256::new();
    hasher.update(url.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(caption.as_deref().unwrap_or_default().as_bytes());
    FingerprintOutcome::Assigned(Fingerprint(hex::encode(hasher.finalize())))
  }
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Tokens that carry no meme identity and are dropped after tokenisation.
pub const BOILERPLATE_TOKENS: &[&str] = &["oc", "repost", "xpost", "crosspost"];

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("bracketed-tag regex")
});

static EDIT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(?:edit|eta|update)\s*[:\-]").expect("edit-marker regex")
});

static MENTION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"/?\b[ru]/\w+").expect("mention regex"));

static CROSSPOST: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(?:x|cross)-post\b").expect("crosspost regex")
});

/// Byte offset of the first edit marker preceded by caption text.
fn edit_cut(text: &str) -> Option<usize> {
  EDIT_MARKER
    .find_iter(text)
    .map(|m| m.start())
    .find(|&start| text[..start].chars().any(char::is_alphanumeric))
}

/// Normalise a caption into its identity-bearing text. See the module docs
/// for the exact rules.
pub fn normalize_caption(title: &str) -> String {
  let lowered = title.to_lowercase();
  let mut stripped = BRACKETED.replace_all(&lowered, " ").into_owned();
  if let Some(cut) = edit_cut(&stripped) {
    stripped.truncate(cut);
  }
  let stripped = MENTION.replace_all(&stripped, " ");
  let stripped = CROSSPOST.replace_all(&stripped, " ");

  let spaced: String = stripped
    .chars()
    .map(|c| if c.is_alphanumeric() { c } else { ' ' })
    .collect();

  spaced
    .split_whitespace()
    .filter(|token| !BOILERPLATE_TOKENS.contains(token))
    .collect::<Vec<_>>()
    .join(" ")
}

/// Normalise an image url: drop query and fragment, strip a trailing slash.
///
/// Input the `url` crate cannot parse is kept as its trimmed, lower-cased
/// text. Blank input yields `None`.
pub fn normalize_url(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  let Ok(mut parsed) = Url::parse(trimmed) else {
    return Some(trimmed.to_lowercase());
  };
  parsed.set_query(None);
  parsed.set_fragment(None);
  let path = parsed.path().trim_end_matches('/').to_owned();
  parsed.set_path(if path.is_empty() { "/" } else { path.as_str() });
  Some(parsed.to_string())
}

// ─── Extraction ──────────────────────────────────────────────────────────────

/// The output of running a policy over a snapshot of posts.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
  /// One row per fingerprinted post, in input order.
  pub assignments: Vec<FingerprintAssignment>,
  /// Diagnostic-only counts of posts in the unfingerprintable bucket.
  pub rejected:    BTreeMap<RejectReason, usize>,
  positions:       Vec<usize>,
}

impl Extraction {
  pub fn rejected_total(&self) -> usize { self.rejected.values().sum() }

  /// Join the assignments back onto `posts`, the slice given to [`extract`].
  pub(crate) fn appearances<'a>(&'a self, posts: &'a [Post]) -> Vec<Appearance<'a>> {
    self
      .positions
      .iter()
      .zip(&self.assignments)
      .filter_map(|(&i, a)| {
        let post = posts.get(i).filter(|p| p.id == a.post_id)?;
        Some(Appearance { post, fingerprint: &a.fingerprint })
      })
      .collect()
  }
}

/// Fingerprint every post with `policy`.
pub fn extract(posts: &[Post], policy: &dyn FingerprintPolicy) -> Extraction {
  let mut out = Extraction::default();

  for (i, post) in posts.iter().enumerate() {
    match policy.fingerprint(post) {
      FingerprintOutcome::Assigned(fingerprint) => {
        out.assignments.push(FingerprintAssignment {
          post_id: post.id.clone(),
          fingerprint,
        });
        out.positions.push(i);
      }
      FingerprintOutcome::Unfingerprintable(reason) => {
        tracing::debug!(post_id = %post.id, reason = reason.as_str(), "post not fingerprintable");
        *out.rejected.entry(reason).or_default() += 1;
      }
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::post;

  #[test]
  fn caption_normalisation_strips_noise() {
    assert_eq!(
      normalize_caption("  When the CODE compiles [OC]  (x-post r/ProgrammerHumor) "),
      "when the code compiles"
    );
    assert_eq!(
      normalize_caption("Cat meme!!! EDIT: thanks for the gold"),
      "cat meme"
    );
    assert_eq!(normalize_caption("repost from /u/someone: Doge"), "from doge");
    assert_eq!(normalize_caption("cross-post: Doge"), "doge");
    assert_eq!(normalize_caption("catmeme"), "catmeme");
  }

  #[test]
  fn caption_normalisation_is_case_and_whitespace_insensitive() {
    assert_eq!(
      normalize_caption("Distracted   Boyfriend"),
      normalize_caption("distracted boyfriend\t")
    );
  }

  #[test]
  fn boilerplate_only_caption_normalises_to_empty() {
    assert_eq!(normalize_caption("[OC] repost"), "");
    assert_eq!(normalize_caption("!!!"), "");
  }

  #[test]
  fn leading_edit_marker_is_not_a_cut() {
    assert_eq!(normalize_caption("Update: new template"), "update new template");
    assert_eq!(normalize_caption("ETA - doge"), "eta doge");
    assert_eq!(
      normalize_caption("Update: drake EDIT: thanks"),
      "update drake"
    );
    assert_eq!(
      CaptionPolicy.fingerprint(&post("1", "A", "Update: new template", 1, None)),
      FingerprintOutcome::Assigned(Fingerprint::new("update new template"))
    );
  }

  #[test]
  fn url_normalisation_drops_query_and_fragment() {
    assert_eq!(
      normalize_url("https://I.Redd.It/abc.jpg?width=640#top").as_deref(),
      Some("https://i.redd.it/abc.jpg")
    );
    assert_eq!(
      normalize_url("https://imgur.com/gallery/xyz/").as_deref(),
      Some("https://imgur.com/gallery/xyz")
    );
    assert_eq!(normalize_url(" IMG1 ").as_deref(), Some("img1"));
    assert_eq!(normalize_url("   "), None);
  }

  #[test]
  fn caption_policy_uses_normalised_text_as_key() {
    let p = post("1", "A", "Cat Meme [OC]", 1, Some(0));
    assert_eq!(
      CaptionPolicy.fingerprint(&p),
      FingerprintOutcome::Assigned(Fingerprint::new("cat meme"))
    );
  }

  #[test]
  fn caption_policy_rejects_unusable_posts() {
    let mut p = post("1", "A", "[OC]", 1, Some(0));
    assert_eq!(
      CaptionPolicy.fingerprint(&p),
      FingerprintOutcome::Unfingerprintable(RejectReason::EmptyCaption)
    );

    p.title = None;
    p.url = None;
    assert_eq!(
      CaptionPolicy.fingerprint(&p),
      FingerprintOutcome::Unfingerprintable(RejectReason::MissingTitleAndUrl)
    );
  }

  #[test]
  fn hybrid_policy_separates_same_caption_on_different_images() {
    let mut a = post("1", "A", "doge", 1, Some(0));
    let mut b = post("2", "B", "Doge!", 1, Some(0));
    a.url = Some("https://i.redd.it/one.jpg".into());
    b.url = Some("https://i.redd.it/one.jpg?utm=x".into());

    let fa = CaptionAndUrlPolicy.fingerprint(&a);
    assert_eq!(fa, CaptionAndUrlPolicy.fingerprint(&b));

    b.url = Some("https://i.redd.it/two.jpg".into());
    assert_ne!(fa, CaptionAndUrlPolicy.fingerprint(&b));

    let FingerprintOutcome::Assigned(fp) = fa else {
      panic!("expected a fingerprint");
    };
    assert_eq!(fp.as_str().len(), 64);
  }

  #[test]
  fn hybrid_policy_falls_back_to_url_only() {
    let mut p = post("1", "A", "[OC]", 1, Some(0));
    assert!(matches!(
      CaptionAndUrlPolicy.fingerprint(&p),
      FingerprintOutcome::Assigned(_)
    ));

    p.url = None;
    assert_eq!(
      CaptionAndUrlPolicy.fingerprint(&p),
      FingerprintOutcome::Unfingerprintable(RejectReason::EmptyCaption)
    );

    p.title = Some("   ".into());
    assert_eq!(
      CaptionAndUrlPolicy.fingerprint(&p),
      FingerprintOutcome::Unfingerprintable(RejectReason::MissingTitleAndUrl)
    );
  }

  #[test]
  fn extraction_is_deterministic_and_counts_rejections() {
    let mut posts = vec![
      post("1", "A", "catmeme", 10, Some(1000)),
      post("2", "B", "[OC]", 50, Some(1100)),
      post("3", "A", "Catmeme", 5, Some(1500)),
    ];
    posts.push(Post { title: None, url: None, ..post("4", "C", "x", 1, None) });

    let first = extract(&posts, &CaptionPolicy);
    let second = extract(&posts, &CaptionPolicy);
    assert_eq!(first.assignments, second.assignments);

    assert_eq!(first.assignments.len(), 2);
    assert_eq!(first.rejected_total(), 2);
    assert_eq!(first.rejected[&RejectReason::EmptyCaption], 1);
    assert_eq!(first.rejected[&RejectReason::MissingTitleAndUrl], 1);

    let joined = first.appearances(&posts);
    assert_eq!(joined[1].post.id, "3");
    assert_eq!(joined[1].fingerprint.as_str(), "catmeme");
  }

  #[test]
  fn appearances_skip_posts_from_another_slice() {
    let posts = vec![
      post("1", "A", "catmeme", 10, Some(1000)),
      post("2", "B", "doge", 5, Some(1500)),
    ];
    let extraction = extract(&posts, &CaptionPolicy);

    assert_eq!(extraction.appearances(&posts[..1]).len(), 1);
    let other = vec![post("9", "Z", "other", 1, None), posts[1].clone()];
    let joined = extraction.appearances(&other);
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].post.id, "2");
  }

  #[test]
  fn policy_kind_parses_config_names() {
    assert_eq!("caption".parse::<PolicyKind>().unwrap(), PolicyKind::Caption);
    assert_eq!(
      "caption_and_url".parse::<PolicyKind>().unwrap(),
      PolicyKind::CaptionAndUrl
    );
    assert!("phash".parse::<PolicyKind>().is_err());
  }
}
