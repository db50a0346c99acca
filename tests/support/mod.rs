//! Test support utilities for cellar integration tests.
//!
//! Provides bundle fixtures, a reversible test transformer and tracing
//! setup.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;

use std::sync::Once;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cellar::core::cipher::Transformer;
use cellar::{Context, Error, Result};

static TRACING: Once = Once::new();

/// Install a test subscriber filtered by `CELLAR_LOG` (e.g.
/// `CELLAR_LOG=cellar=debug cargo test`). Silent when unset.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env("CELLAR_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// `encrypt(x) = base64(x)`, `decrypt(x) = unbase64(x)`.
#[derive(Debug, Default)]
pub struct Base64Transformer;

impl Transformer for Base64Transformer {
    fn name(&self) -> &str {
        "base64"
    }

    fn encrypt(&self, ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        Ok(STANDARD.encode(plaintext).into_bytes())
    }

    fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::InvalidArgument(e.to_string()))
    }
}

/// Always fails to decrypt.
#[derive(Debug, Default)]
pub struct RejectingTransformer;

impl Transformer for RejectingTransformer {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn encrypt(&self, _ctx: &Context, _plaintext: &[u8]) -> Result<Vec<u8>> {
        Err(Error::InvalidArgument("encryption disabled".into()))
    }

    fn decrypt(&self, _ctx: &Context, _ciphertext: &[u8]) -> Result<Vec<u8>> {
        Err(Error::InvalidArgument("wrong key".into()))
    }
}
