//! Cloud Secret Organization path taxonomy.
//!
//! Package names following the taxonomy start with one of six rings, each
//! with a minimum number of path segments:
//!
//! | Ring       | Layout                                                  |
//! |------------|---------------------------------------------------------|
//! | `meta`     | `meta/<owner>/...`                                      |
//! | `infra`    | `infra/<provider>/<account>/<region>/<service>/...`     |
//! | `platform` | `platform/<stage>/<name>/<region>/<service>/...`        |
//! | `product`  | `product/<name>/<version>/<component>/...`              |
//! | `app`      | `app/<stage>/<platform>/<product>/<version>/<component>/...` |
//! | `artifact` | `artifact/<type>/<id>/...`                              |
//!
//! Stages are `dev`, `qa`, `staging` and `production`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Top-level taxonomy ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ring {
    Meta,
    Infra,
    Platform,
    Product,
    App,
    Artifact,
}

impl Ring {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Infra => "infra",
            Self::Platform => "platform",
            Self::Product => "product",
            Self::App => "app",
            Self::Artifact => "artifact",
        }
    }

    /// Minimum segment count, ring included.
    pub fn min_depth(&self) -> usize {
        match self {
            Self::Meta => 2,
            Self::Infra | Self::Platform => 5,
            Self::Product => 4,
            Self::App => 6,
            Self::Artifact => 3,
        }
    }

    /// Whether the second segment must be a [`Stage`].
    pub fn is_staged(&self) -> bool {
        matches!(self, Self::Platform | Self::App)
    }
}

impl FromStr for Ring {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "meta" => Ok(Self::Meta),
            "infra" => Ok(Self::Infra),
            "platform" => Ok(Self::Platform),
            "product" => Ok(Self::Product),
            "app" => Ok(Self::App),
            "artifact" => Ok(Self::Artifact),
            other => Err(Error::Validation(format!("unknown ring '{}'", other))),
        }
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Dev,
    Qa,
    Staging,
    Production,
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Self::Dev),
            "qa" => Ok(Self::Qa),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(Error::Validation(format!("unknown stage '{}'", other))),
        }
    }
}

/// Check a package name against the taxonomy and return its ring.
///
/// # Errors
///
/// Returns `Error::Validation` describing why the path is not compliant.
pub fn validate(path: &str) -> Result<Ring> {
    let segments: Vec<&str> = path.split('/').collect();
    let ring: Ring = segments[0].parse()?;

    if segments.len() < ring.min_depth() {
        return Err(Error::Validation(format!(
            "'{}' needs at least {} segments for ring '{}'",
            path,
            ring.min_depth(),
            ring
        )));
    }

    if let Some(bad) = segments.iter().find(|s| !is_segment(s)) {
        return Err(Error::Validation(format!(
            "'{}' has an invalid segment '{}'",
            path, bad
        )));
    }

    if ring.is_staged() {
        segments[1].parse::<Stage>()?;
    }

    Ok(ring)
}

/// Whether `path` follows the taxonomy.
pub fn is_compliant(path: &str) -> bool {
    validate(path).is_ok()
}

fn is_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliant_paths() {
        assert_eq!(validate("meta/security").unwrap(), Ring::Meta);
        assert_eq!(
            validate("infra/aws/security/eu-central-1/ec2/ssh").unwrap(),
            Ring::Infra
        );
        assert_eq!(
            validate("platform/production/customer/us-east-1/rds").unwrap(),
            Ring::Platform
        );
        assert_eq!(
            validate("product/ece/v1.0.0/server/license").unwrap(),
            Ring::Product
        );
        assert_eq!(
            validate("app/staging/customer/billing/v1.2.0/api").unwrap(),
            Ring::App
        );
        assert_eq!(
            validate("artifact/docker/sha256-abcdef").unwrap(),
            Ring::Artifact
        );
    }

    #[test]
    fn test_non_compliant_paths() {
        assert!(!is_compliant(""));
        assert!(!is_compliant("apps/production/a/b/c/d"));
        assert!(!is_compliant("app/production/customer"));
        assert!(!is_compliant("app/prod/customer/billing/v1/api"));
        assert!(!is_compliant("meta/"));
        assert!(!is_compliant("artifact/docker/-leading"));
        assert!(!is_compliant("infra/aws/acc/eu west/ec2"));
    }

    #[test]
    fn test_error_message_names_ring() {
        let err = validate("product/ece").unwrap_err();
        assert!(err.to_string().contains("ring 'product'"));
    }
}
