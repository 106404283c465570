//! Error type for `memeprop-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] memeprop_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored value does not fit the domain type (e.g. a negative count).
  #[error("cannot decode {column}: {value}")]
  Decode {
    column: &'static str,
    value:  i64,
  },

  /// Post ids are the post store's identity; staging an existing id is
  /// refused and the whole staging call is rolled back.
  #[error("post {0} already exists in the post store")]
  DuplicatePost(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
