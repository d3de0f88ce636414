// src/packages/mod.rs

//! Package format support for Gemvault
//!
//! A `.gem` is an uncompressed tar holding `metadata.gz` (the YAML
//! gemspec) and `data.tar.gz` (the packaged sources).

pub mod gem;

pub use gem::GemPackage;
