//! Age transformer.
//!
//! Encrypts to one or more x25519 recipients using the binary age format.
//! Decryption needs the matching identity.

use std::io::{Read, Write};

use ::age::x25519;
use tracing::trace;

use super::Transformer;
use crate::core::context::Context;
use crate::error::{Error, Result};

/// Age-based transformer using x25519 keys.
#[derive(Clone)]
pub struct AgeTransformer {
    recipients: Vec<x25519::Recipient>,
    identity: Option<x25519::Identity>,
}

impl AgeTransformer {
    /// Transformer able to encrypt for `recipients`, and to decrypt when an
    /// identity is given.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when `recipients` is empty.
    pub fn new(
        recipients: Vec<x25519::Recipient>,
        identity: Option<x25519::Identity>,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::InvalidArgument(
                "age transformer needs at least one recipient".into(),
            ));
        }
        Ok(Self {
            recipients,
            identity,
        })
    }

    /// Transformer encrypting to the identity's own public key.
    pub fn from_identity(identity: x25519::Identity) -> Self {
        Self {
            recipients: vec![identity.to_public()],
            identity: Some(identity),
        }
    }

    pub fn recipients(&self) -> &[x25519::Recipient] {
        &self.recipients
    }

    /// Whether this transformer can decrypt.
    pub fn can_decrypt(&self) -> bool {
        self.identity.is_some()
    }
}

impl Transformer for AgeTransformer {
    fn name(&self) -> &str {
        "age"
    }

    fn encrypt(&self, ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        trace!(
            recipients = self.recipients.len(),
            plaintext_len = plaintext.len(),
            "encrypting"
        );

        let encryptor = ::age::Encryptor::with_recipients(
            self.recipients.iter().map(|r| r as &dyn ::age::Recipient),
        )
        .map_err(|e| encrypt_error(e.to_string()))?;

        let mut encrypted = Vec::new();
        let mut writer = encryptor.wrap_output(&mut encrypted)?;
        writer.write_all(plaintext)?;
        writer.finish()?;

        trace!(ciphertext_len = encrypted.len(), "encrypted");
        Ok(encrypted)
    }

    fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| decrypt_error("no identity configured".into()))?;
        trace!(ciphertext_len = ciphertext.len(), "decrypting");

        let decryptor =
            ::age::Decryptor::new(ciphertext).map_err(|e| decrypt_error(e.to_string()))?;
        let mut reader = decryptor
            .decrypt(std::iter::once(identity as &dyn ::age::Identity))
            .map_err(|e| decrypt_error(e.to_string()))?;

        let mut decrypted = Vec::new();
        reader.read_to_end(&mut decrypted)?;

        trace!(plaintext_len = decrypted.len(), "decrypted");
        Ok(decrypted)
    }
}

impl std::fmt::Debug for AgeTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeTransformer")
            .field("recipients", &self.recipients.len())
            .field("identity", &self.identity.is_some())
            .finish()
    }
}

// The pipeline rewraps these with the package name.
fn encrypt_error(reason: String) -> Error {
    Error::Encrypt {
        package: String::new(),
        reason,
    }
}

fn decrypt_error(reason: String) -> Error {
    Error::Decrypt {
        package: String::new(),
        reason,
    }
}

/// Parse a public key string into an age recipient.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if the key format is invalid.
pub fn parse_recipient(key: &str) -> Result<x25519::Recipient> {
    key.trim()
        .parse::<x25519::Recipient>()
        .map_err(|_| Error::InvalidArgument(format!("invalid age recipient '{}'", key)))
}

/// Parse an `AGE-SECRET-KEY-1…` string into an identity.
///
/// The key material is not echoed back in the error.
pub fn parse_identity(key: &str) -> Result<x25519::Identity> {
    key.trim()
        .parse::<x25519::Identity>()
        .map_err(|_| Error::InvalidArgument("invalid age identity".into()))
}
