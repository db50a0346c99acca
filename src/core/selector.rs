//! Package selectors.
//!
//! A selector is a predicate over a [`Package`]. All variants are compiled
//! eagerly so malformed patterns surface when the selector is built, never
//! while a bundle is being processed.
//!
//! Evaluation failures at match time (an unpackable secret, a policy that
//! does not answer with a boolean) are returned by [`Selector::evaluate`].
//! Only the infallible [`Selector::is_satisfied_by`] folds them into a
//! non-match, logged at `warn` level.

use globset::GlobMatcher;
use regex::Regex;
use tracing::warn;

use crate::core::codec;
use crate::core::domain::Package;
use crate::core::expr::Program;
use crate::core::glob::compile_glob;
use crate::error::{Error, Result};

#[cfg(feature = "rego")]
use crate::core::constants::REGO_QUERY_MATCHED;
#[cfg(feature = "rego")]
use crate::core::policy::Policy;

/// Predicate over packages.
pub trait Selector {
    /// # Errors
    ///
    /// Returns the evaluation failure, typically `Error::Expression`.
    fn evaluate(&self, package: &Package) -> Result<bool>;

    /// Like [`Selector::evaluate`], with failures counted as no match.
    fn is_satisfied_by(&self, package: &Package) -> bool {
        self.evaluate(package).unwrap_or_else(|e| {
            warn!(package = %package.name, error = %e, "selector evaluation failed");
            false
        })
    }
}

impl<F> Selector for F
where
    F: Fn(&Package) -> bool,
{
    fn evaluate(&self, package: &Package) -> Result<bool> {
        Ok(self(package))
    }
}

/// Boxed selector, as built from patch documents.
pub type BoxedSelector = Box<dyn Selector>;

/// String matcher shared by path and secret-key selectors.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact, case-sensitive equality.
    Strict(String),
    /// Unanchored regular expression.
    Regex(Regex),
    /// Glob with `/` as separator.
    Glob(GlobMatcher),
}

impl Matcher {
    pub fn strict(value: impl Into<String>) -> Self {
        Self::Strict(value.into())
    }

    /// # Errors
    ///
    /// Returns `Error::SelectorCompile` for an invalid pattern.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| Error::selector(pattern, e))
    }

    pub fn glob(pattern: &str) -> Result<Self> {
        compile_glob(pattern).map(Self::Glob)
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Strict(expected) => expected == value,
            Self::Regex(re) => re.is_match(value),
            Self::Glob(glob) => glob.is_match(value),
        }
    }
}

/// Matches the package name.
#[derive(Debug, Clone)]
pub struct MatchPath(Matcher);

impl MatchPath {
    pub fn new(matcher: Matcher) -> Self {
        Self(matcher)
    }
}

impl Selector for MatchPath {
    fn evaluate(&self, package: &Package) -> Result<bool> {
        Ok(self.0.is_match(&package.name))
    }
}

/// Matches packages holding at least one secret whose key matches.
///
/// Locked packages never match.
#[derive(Debug, Clone)]
pub struct MatchSecret(Matcher);

impl MatchSecret {
    pub fn new(matcher: Matcher) -> Self {
        Self(matcher)
    }
}

impl Selector for MatchSecret {
    fn evaluate(&self, package: &Package) -> Result<bool> {
        Ok(package.kvs().iter().any(|kv| self.0.is_match(&kv.key)))
    }
}

/// JMESPath query over the package JSON projection; satisfied only when
/// the query yields `true`. Other results are a non-match.
pub struct JmesPath {
    source: String,
    expression: jmespath::Expression<'static>,
}

impl JmesPath {
    pub fn new(source: &str) -> Result<Self> {
        let expression = jmespath::compile(source).map_err(|e| Error::selector(source, e))?;
        Ok(Self {
            source: source.to_string(),
            expression,
        })
    }

}

impl Selector for JmesPath {
    fn evaluate(&self, package: &Package) -> Result<bool> {
        let input = codec::package_json(package)?;
        let result = self
            .expression
            .search(input)
            .map_err(|e| Error::Expression(format!("jmespath '{}': {}", self.source, e)))?;
        Ok(result.as_boolean().unwrap_or(false))
    }
}

impl std::fmt::Debug for JmesPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("JmesPath").field(&self.source).finish()
    }
}

/// Rego module answering `data.harp.matched` for the package JSON
/// projection given as `input`.
#[cfg(feature = "rego")]
#[derive(Debug, Clone)]
pub struct Rego(Policy);

#[cfg(feature = "rego")]
impl Rego {
    pub fn new(source: &str) -> Result<Self> {
        Policy::compile("selector", source, REGO_QUERY_MATCHED).map(Self)
    }
}

#[cfg(feature = "rego")]
impl Selector for Rego {
    fn evaluate(&self, package: &Package) -> Result<bool> {
        let input = codec::package_json(package)?;
        self.0.evaluate(&input)
    }
}

/// Package expressions; satisfied when every expression holds.
#[derive(Debug, Clone)]
pub struct Expressions(Vec<Program>);

impl Expressions {
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::selector("", "at least one expression is required"));
        }
        sources
            .iter()
            .map(|s| Program::compile(s.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl Selector for Expressions {
    fn evaluate(&self, package: &Package) -> Result<bool> {
        for program in &self.0 {
            if !program.evaluate(package)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::KV;

    fn package(name: &str, keys: &[&str]) -> Package {
        let mut package = Package::new(name);
        for key in keys {
            package.chain_mut().data.push(KV::new(*key, "v").unwrap());
        }
        package
    }

    #[test]
    fn test_match_path_variants() {
        let p = package("app/production/web", &[]);
        assert!(MatchPath::new(Matcher::strict("app/production/web")).is_satisfied_by(&p));
        assert!(!MatchPath::new(Matcher::strict("APP/production/web")).is_satisfied_by(&p));
        assert!(MatchPath::new(Matcher::regex("production").unwrap()).is_satisfied_by(&p));
        assert!(MatchPath::new(Matcher::regex("^app/.*/web$").unwrap()).is_satisfied_by(&p));
        assert!(MatchPath::new(Matcher::glob("app/*/web").unwrap()).is_satisfied_by(&p));
        assert!(!MatchPath::new(Matcher::glob("app/*").unwrap()).is_satisfied_by(&p));
    }

    #[test]
    fn test_compile_errors_are_eager() {
        assert!(matches!(
            Matcher::regex("app/(x"),
            Err(Error::SelectorCompile { .. })
        ));
        assert!(Matcher::glob("app/[").is_err());
        assert!(JmesPath::new("name ==").is_err());
        assert!(Expressions::new(&["p.nope()"]).is_err());
        assert!(Expressions::new::<&str>(&[]).is_err());
    }

    #[test]
    fn test_match_secret() {
        let p = package("app/x", &["DB_PASSWORD", "API_KEY"]);
        assert!(MatchSecret::new(Matcher::strict("API_KEY")).is_satisfied_by(&p));
        assert!(MatchSecret::new(Matcher::regex("^DB_").unwrap()).is_satisfied_by(&p));
        assert!(!MatchSecret::new(Matcher::glob("TOKEN*").unwrap()).is_satisfied_by(&p));
    }

    #[test]
    fn test_jmespath() {
        let mut p = package("app/x", &["k"]);
        p.labels.insert("tier".into(), "front".into());
        assert!(JmesPath::new("labels.tier == 'front'").unwrap().is_satisfied_by(&p));
        assert!(JmesPath::new("name == 'app/x'").unwrap().is_satisfied_by(&p));
        assert!(!JmesPath::new("labels.tier == 'back'").unwrap().is_satisfied_by(&p));
        // Non-boolean results never match.
        assert!(!JmesPath::new("name").unwrap().is_satisfied_by(&p));
    }

    #[test]
    fn test_expressions_all_must_hold() {
        let p = package("app/x", &["API_KEY"]);
        let both = Expressions::new(&[r#"p.has_secret("API_KEY")"#, r#"p.match_path("app/*")"#]);
        assert!(both.unwrap().is_satisfied_by(&p));
        let one = Expressions::new(&[r#"p.has_secret("API_KEY")"#, r#"p.has_secret("X")"#]);
        assert!(!one.unwrap().is_satisfied_by(&p));
    }

    #[test]
    fn test_runtime_failure_surfaces() {
        let p = package("app/x", &[]);
        let selector = Expressions::new(&["p.labels.missing == 'x'"]).unwrap();
        assert!(matches!(selector.evaluate(&p), Err(Error::Expression(_))));
        assert!(!selector.is_satisfied_by(&p));
    }

    #[cfg(feature = "rego")]
    #[test]
    fn test_rego_selector() {
        let selector = Rego::new(
            r#"
package harp

default matched = false

matched {
    startswith(input.name, "app/")
}
"#,
        )
        .unwrap();
        assert!(selector.is_satisfied_by(&package("app/x", &[])));
        assert!(!selector.is_satisfied_by(&package("infra/x", &[])));
    }

    #[cfg(feature = "rego")]
    #[test]
    fn test_rego_non_boolean_is_an_error() {
        let selector = Rego::new(
            r#"
package harp

matched = "yes"
"#,
        )
        .unwrap();
        let p = package("app/x", &[]);
        assert!(matches!(selector.evaluate(&p), Err(Error::Expression(_))));
        assert!(!selector.is_satisfied_by(&p));
    }

    #[test]
    fn test_closures_are_selectors() {
        let selector = |p: &Package| p.name.ends_with("/x");
        assert!(selector.is_satisfied_by(&package("app/x", &[])));
    }
}
