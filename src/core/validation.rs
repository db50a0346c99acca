//! Input validation for bundle contents.
//!
//! Validates package names and secret keys produced by builders and
//! patches.

use crate::error::{Error, Result};

/// Validate a package name.
///
/// Package names are slash-delimited paths:
/// - Cannot be empty
/// - Cannot start or end with `/`
/// - Cannot contain empty segments (`a//b`)
/// - Cannot contain whitespace or control characters
///
/// # Errors
///
/// Returns `Error::Validation` describing the first problem found.
pub fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("package name must not be empty".into()));
    }

    if let Some((i, ch)) = name
        .chars()
        .enumerate()
        .find(|(_, c)| c.is_whitespace() || c.is_control())
    {
        return Err(Error::Validation(format!(
            "package name '{}' has invalid character {:?} at position {}",
            name,
            ch,
            i + 1
        )));
    }

    if name.split('/').any(str::is_empty) {
        return Err(Error::Validation(format!(
            "package name '{}' has an empty path segment",
            name
        )));
    }

    Ok(())
}

/// Validate a secret key.
///
/// Keys cannot be empty or contain control characters.
pub fn validate_secret_key(package: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation(format!(
            "package '{}' has an empty secret key",
            package
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::Validation(format!(
            "secret key '{}#{}' contains control characters",
            package,
            key.escape_debug()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_package_names() {
        assert!(validate_package_name("app").is_ok());
        assert!(validate_package_name("app/production/customer/web").is_ok());
        assert!(validate_package_name("infra/aws/essp/us-east-1/rds/adminconsole").is_ok());
        assert!(validate_package_name("a.b_c-d/e").is_ok());
    }

    #[test]
    fn test_invalid_package_names() {
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("/app").is_err());
        assert!(validate_package_name("app/").is_err());
        assert!(validate_package_name("app//x").is_err());
        assert!(validate_package_name("app/my service").is_err());
        assert!(validate_package_name("app/\tx").is_err());
    }

    #[test]
    fn test_secret_keys() {
        assert!(validate_secret_key("app/x", "API_KEY").is_ok());
        assert!(validate_secret_key("app/x", "db.password").is_ok());
        assert!(validate_secret_key("app/x", "with space").is_ok());
        assert!(validate_secret_key("app/x", "").is_err());

        let err = validate_secret_key("app/x", "bad\nkey").unwrap_err();
        assert!(err.to_string().contains("app/x#bad\\nkey"));
    }
}
