//! Constants used throughout cellar.
//!
//! Centralizes document identifiers, annotation keys and wire tags.

/// `apiVersion` accepted by patch and ruleset documents.
pub const API_VERSION: &str = "harp.elastic.co/v1";

/// `kind` of a bundle patch document.
pub const KIND_BUNDLE_PATCH: &str = "BundlePatch";

/// `kind` of a ruleset document.
pub const KIND_RULESET: &str = "RuleSet";

/// Package annotation naming the transformer used by partial locking.
pub const ANNOTATION_ENCRYPTION_KEY_ALIAS: &str = "harp.elastic.co/v1/package#encryptionKeyAlias";

/// Annotation set on every package a patch rule touched.
pub const ANNOTATION_PATCHED: &str = "patched";

/// Version stamped into every packed value envelope.
pub const PACKER_FORMAT_VERSION: u8 = 1;

/// ASN.1 universal, constructed SEQUENCE tag.
pub const TAG_SEQUENCE: u8 = 0x30;

/// ASN.1 universal, primitive INTEGER tag.
pub const TAG_INTEGER: u8 = 0x02;

/// Bundle format version written by builders.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Proof index used by bundle Merkle trees.
pub const MERKLE_PROOF_INDEX: u64 = 1;

/// Rego query evaluated by ruleset rules.
pub const REGO_QUERY_COMPLIANT: &str = "data.harp.compliant";

/// Rego query evaluated by selectors.
pub const REGO_QUERY_MATCHED: &str = "data.harp.matched";
