//! Value transformers and the bundle encryption pipeline.
//!
//! A [`Transformer`] is a reversible byte-to-byte function pair. The core
//! never assumes an algorithm; it only requires that decrypting an
//! encrypted buffer yields the original bytes.
//!
//! ## Pipeline
//!
//! - [`lock`]: encrypt every unlocked package with one transformer.
//! - [`partial_lock`]: encrypt only packages annotated with an encryption
//!   key alias, resolving the alias through a [`Keyring`].
//! - [`unlock`]: decrypt every locked package with the first transformer
//!   that succeeds.
//!
//! ## Adding a New Transformer
//!
//! 1. Implement the `Transformer` trait
//! 2. Honor the [`Context`] before any blocking call
//! 3. Register it in a `Keyring` under an alias

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::context::Context;
use crate::error::Result;

mod age;
mod lock;

pub use age::{parse_identity, parse_recipient, AgeTransformer};
pub use lock::{lock, partial_lock, unlock};

/// Reversible value transformer.
///
/// Implementations must be safe to call concurrently.
pub trait Transformer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Encrypt `plaintext`.
    ///
    /// # Errors
    ///
    /// `Error::Canceled` when the context is done; any other error is
    /// reported by the pipeline as an encryption failure.
    fn encrypt(&self, ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext`.
    fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Shared transformer handle.
pub type TransformerRef = Arc<dyn Transformer>;

/// Alias → transformer registry used by [`partial_lock`] and [`unlock`].
#[derive(Clone, Default)]
pub struct Keyring {
    transformers: BTreeMap<String, TransformerRef>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer, replacing any previous one under `alias`.
    pub fn insert(&mut self, alias: impl Into<String>, transformer: TransformerRef) {
        self.transformers.insert(alias.into(), transformer);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, alias: impl Into<String>, transformer: TransformerRef) -> Self {
        self.insert(alias, transformer);
        self
    }

    pub fn get(&self, alias: &str) -> Option<&TransformerRef> {
        self.transformers.get(alias)
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.transformers.keys().map(String::as_str)
    }

    /// Transformers in alias order, as tried by [`unlock`].
    pub fn transformers(&self) -> Vec<TransformerRef> {
        self.transformers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.transformers.iter().map(|(k, v)| (k, v.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Transformer for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn encrypt(&self, _: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(plaintext.to_vec())
        }
        fn decrypt(&self, _: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }
    }

    #[test]
    fn test_keyring_orders_by_alias() {
        let keyring = Keyring::new()
            .with("staging", Arc::new(Named("b")))
            .with("production", Arc::new(Named("a")));
        assert_eq!(keyring.len(), 2);
        assert_eq!(
            keyring.aliases().collect::<Vec<_>>(),
            vec!["production", "staging"]
        );
        let names: Vec<_> = keyring
            .transformers()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_keyring_insert_replaces() {
        let mut keyring = Keyring::new();
        keyring.insert("k", Arc::new(Named("first")));
        keyring.insert("k", Arc::new(Named("second")));
        assert_eq!(keyring.get("k").map(|t| t.name()), Some("second"));
        assert!(keyring.get("missing").is_none());
        assert_eq!(format!("{:?}", keyring), r#"{"k": "second"}"#);
    }
}
