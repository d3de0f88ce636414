// src/lib.rs

//! Gemvault Private Gem Repository
//!
//! Stores versioned gem archives, keeps the RubyGems index fragments in sync
//! with them, and lazily builds per-gem documentation sites.
//!
//! # Architecture
//!
//! - Package store: archives keyed by filename, written with temp+rename
//! - Index: Marshal 4.8 fragments, rebuilt in full or patched incrementally
//! - Version collection: union of the index fragments, queried by listings
//! - Docs: generated once per gem in an isolated workspace, renamed into place
//! - Repository: the service an HTTP front end calls into

pub mod config;
pub mod docs;
mod error;
pub mod index;
pub mod packages;
pub mod repository;
pub mod store;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use repository::Repository;
