//! Engine configuration.
//!
//! A small TOML document selecting the pipeline defaults and declaring the
//! age keys behind each encryption key alias. The caller chooses where it
//! comes from; nothing here looks up files or environment on its own.
//!
//! ```toml
//! [encryption]
//! skip_unresolved = false
//! skip_undecryptable = false
//!
//! [lint]
//! policy_root = "policies"
//!
//! [keys.production]
//! recipients = ["age1..."]
//! identity = "AGE-SECRET-KEY-1..."
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::cipher::{self, AgeTransformer, Keyring};
use crate::error::{ConfigError, Result};

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub lint: LintConfig,
    /// Encryption key alias → age key material.
    #[serde(default)]
    pub keys: BTreeMap<String, KeyConfig>,
}

/// Pipeline defaults for partial lock and unlock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Leave packages whose alias is not in the keyring unlocked.
    #[serde(default)]
    pub skip_unresolved: bool,
    /// Leave packages no transformer can decrypt locked.
    #[serde(default)]
    pub skip_undecryptable: bool,
}

/// Linter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintConfig {
    /// Base directory for ruleset `regoFile` references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_root: Option<PathBuf>,
}

/// Age key material for one alias.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Public keys (`age1...`) packages are encrypted to.
    pub recipients: Vec<String>,
    /// Private key (`AGE-SECRET-KEY-1...`), needed to decrypt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("recipients", &self.recipients)
            .field("identity", &self.identity.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the TOML is malformed, or a
    /// validation error from [`Config::validate`].
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        debug!(keys = config.keys.len(), "config parsed");
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Write the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "saving config");
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(ConfigError::Serialize)?)
    }

    /// Validate key declarations.
    ///
    /// Checks:
    /// - Aliases are non-empty
    /// - Every alias has at least one recipient
    /// - Recipients and identities parse as age keys
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoRecipients` or `ConfigError::InvalidValue`.
    pub fn validate(&self) -> Result<()> {
        for (alias, key) in &self.keys {
            if alias.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "keys",
                    reason: "key alias must not be empty".to_string(),
                }
                .into());
            }
            if key.recipients.is_empty() {
                return Err(ConfigError::NoRecipients(alias.clone()).into());
            }
            for recipient in &key.recipients {
                if cipher::parse_recipient(recipient).is_err() {
                    return Err(ConfigError::InvalidValue {
                        field: "recipients",
                        reason: format!("invalid age public key for '{}': {}", alias, recipient),
                    }
                    .into());
                }
            }
            if let Some(identity) = &key.identity {
                if cipher::parse_identity(identity).is_err() {
                    return Err(ConfigError::InvalidValue {
                        field: "identity",
                        reason: format!("invalid age identity for '{}'", alias),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Build an age transformer for every declared alias.
    pub fn keyring(&self) -> Result<Keyring> {
        let mut keyring = Keyring::new();
        for (alias, key) in &self.keys {
            let recipients = key
                .recipients
                .iter()
                .map(|r| cipher::parse_recipient(r))
                .collect::<Result<Vec<_>>>()?;
            let identity = key
                .identity
                .as_deref()
                .map(cipher::parse_identity)
                .transpose()?;
            keyring.insert(alias.clone(), Arc::new(AgeTransformer::new(recipients, identity)?));
        }
        debug!(aliases = keyring.len(), "keyring built");
        Ok(keyring)
    }
}
