//! Core types and the batch propagation-analytics engine for memeprop.
//!
//! This crate is deliberately free of database and runtime dependencies. It
//! turns a snapshot of posts into the derived relations (`title_fingerprints`,
//! `fingerprint_stats`, `subreddit_adoption_stats`, `image_mutations`); storage
//! backends implement [`store::PropagationStore`] to load and persist them.

pub mod adoption;
pub mod batch;
pub mod error;
pub mod fingerprint;
pub mod mutation;
pub mod post;
pub mod propagation;
pub mod store;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
