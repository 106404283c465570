//! Engine configuration: an optional TOML file layered with `MEMEPROP_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use memeprop_core::{
  adoption::{AdoptionConfig, DEFAULT_MIN_APPEARANCES},
  batch::AnalysisConfig,
  fingerprint::PolicyKind,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub store_path:      PathBuf,
  pub policy:          PolicyKind,
  pub min_appearances: u32,
  pub workers:         usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      store_path:      PathBuf::from("memeprop.db"),
      policy:          PolicyKind::default(),
      min_appearances: DEFAULT_MIN_APPEARANCES,
      workers:         1,
    }
  }
}

impl EngineConfig {
  /// Read `path` (if it exists) and the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("MEMEPROP").try_parsing(true))
      .build()
      .context("failed to read config file")?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise EngineConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn analysis(&self) -> AnalysisConfig {
    AnalysisConfig {
      policy:   self.policy,
      adoption: AdoptionConfig { min_appearances: self.min_appearances },
      workers:  self.workers,
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.policy, PolicyKind::Caption);
    assert_eq!(cfg.min_appearances, 3);
    assert_eq!(cfg.workers, 1);
  }

  #[test]
  fn file_values_override_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "policy = \"caption_and_url\"\nworkers = 4").unwrap();

    let cfg = EngineConfig::load(file.path()).unwrap();
    assert_eq!(cfg.policy, PolicyKind::CaptionAndUrl);
    assert_eq!(cfg.workers, 4);
    assert_eq!(cfg.min_appearances, 3);
    assert_eq!(cfg.analysis().adoption.min_appearances, 3);
  }

  #[test]
  fn tilde_expands_to_home() {
    let expanded = expand_tilde(Path::new("~/memeprop.db"));
    if std::env::var("HOME").is_ok() {
      assert!(!expanded.starts_with("~"));
    }
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }
}
