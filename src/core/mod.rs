//! Core library components.
//!
//! Everything the engine does lives here: the bundle data model and its
//! binary envelope, integrity, encryption, diffing, patching and linting.

pub mod builder;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod constants;
pub mod context;
pub mod cso;
pub mod diff;
pub mod domain;
pub mod expr;
pub mod glob;
pub mod merkle;
pub mod packer;
pub mod patch;
#[cfg(feature = "rego")]
pub mod policy;
pub mod ruleset;
pub mod selector;
pub mod template;
pub mod types;
pub mod validation;
