//! Cellar - content-addressed secret bundles.
//!
//! A bundle is a tree of packages, each holding a chain of key/value
//! secrets. Cellar packs values into a versioned binary envelope, seals
//! bundles with a Merkle root, encrypts packages through pluggable
//! transformers, and diffs, patches and lints bundles.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── error             # Error / ConfigError
//! └── core/
//!     ├── domain/       # Bundle, Package, SecretChain, KV, OpLog
//!     ├── packer        # Value envelope
//!     ├── merkle        # Accumulator, proofs, bundle root
//!     ├── codec         # Load/dump, JSON projection, read
//!     ├── diff          # Bundle diff into an OpLog
//!     ├── cipher/       # Transformer trait, keyring, lock/unlock
//!     │   └── age       # age x25519 transformer
//!     ├── config        # TOML engine configuration
//!     ├── selector      # Package selectors
//!     ├── expr/         # Package expression language
//!     ├── policy        # Embedded Rego (feature `rego`)
//!     ├── template      # Template renderer for patches
//!     ├── patch/        # BundlePatch documents and executor
//!     ├── ruleset/      # RuleSet documents and linter
//!     ├── cso           # Cloud Secret Organization taxonomy
//!     └── builder       # Bundles from JSON, maps, oplogs
//! ```
//!
//! # Example
//!
//! ```
//! use cellar::core::{builder, codec};
//! use std::collections::BTreeMap;
//!
//! let map = BTreeMap::from([(
//!     "app/production/web".to_string(),
//!     BTreeMap::from([("API_KEY".to_string(), "s3cr3t")]),
//! )]);
//! let mut bundle = builder::from_map(&map)?;
//! let bytes = codec::to_bytes(&mut bundle)?;
//! let loaded = codec::from_bytes(&bytes)?;
//! assert_eq!(codec::read(&loaded, "app/production/web")?["API_KEY"], "s3cr3t");
//! # Ok::<(), cellar::Error>(())
//! ```

pub mod core;
pub mod error;

pub use crate::core::cipher::{Keyring, Transformer, TransformerRef};
pub use crate::core::context::Context;
pub use crate::core::domain::{Bundle, DiffItem, OpLog, Package, SecretChain, KV};
pub use crate::error::{Error, Result};
