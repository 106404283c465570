//! Error types for `memeprop-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Post identity is assumed unique; a repeated id rejects the whole batch.
  #[error("duplicate post id in batch: {0}")]
  DuplicatePostId(String),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("unknown {relation} column: {column:?}")]
  UnknownColumn {
    relation: &'static str,
    column:   String,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
