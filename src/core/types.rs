//! Semantic aliases for bundle, package and secret identifiers.

use std::collections::BTreeMap;

/// A package path (e.g., `app/production/billing/v1/api`).
///
/// Slash-delimited and unique within a bundle.
pub type PackageName = String;

/// A secret key inside a package (e.g., `DB_PASSWORD`).
pub type SecretKey = String;

/// A packed secret value (see [`crate::core::packer`]).
pub type PackedValue = Vec<u8>;

/// Label set. Labels classify.
pub type Labels = BTreeMap<String, String>;

/// Annotation set. Annotations decorate.
pub type Annotations = BTreeMap<String, String>;

/// A 64-byte Merkle root.
pub type MerkleRoot = Vec<u8>;
