//! Error types.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants map
//! one-to-one onto the error kinds callers are expected to branch on, and
//! carry the identity of the offending object where there is one.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unable to pack value: {0}")]
    Pack(String),

    #[error("unable to unpack value: {0}")]
    Unpack(String),

    #[error("bundle is corrupted: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unable to encrypt package '{package}': {reason}")]
    Encrypt { package: String, reason: String },

    #[error("unable to decrypt package '{package}': {reason}")]
    Decrypt { package: String, reason: String },

    #[error("package '{package}' references unknown encryption key alias '{alias}'")]
    KeyNotFound { package: String, alias: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unable to compile selector '{selector}': {reason}")]
    SelectorCompile { selector: String, reason: String },

    #[error("unable to render template '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("package '{package}' violates rule '{rule}'")]
    Violation { package: String, rule: String },

    #[error("rule '{0}' did not match any package")]
    UnmatchedRule(String),

    #[error("unknown operation: {0}")]
    UnknownOp(String),

    #[error("operation canceled")]
    Canceled,

    #[error("unable to diff secret '{package}#{key}': {source}")]
    Diff {
        package: String,
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("expression evaluation failed: {0}")]
    Expression(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("key alias '{0}' has no recipients")]
    NoRecipients(String),
}

impl Error {
    /// Shorthand for a selector compilation failure.
    pub(crate) fn selector(selector: impl Into<String>, reason: impl ToString) -> Self {
        Self::SelectorCompile {
            selector: selector.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a template rendering failure.
    pub(crate) fn template(template: impl Into<String>, reason: impl ToString) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
