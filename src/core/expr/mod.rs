//! Package expression language.
//!
//! A small, side-effect free language evaluated against one package bound
//! to the identifier `p`. Programs are compiled once (tokenized, parsed and
//! statically checked) and evaluated for every candidate package.
//!
//! ```text
//! p.has_secret("API_KEY") && p.secret("API_KEY").is_base64()
//! p.match_path("app/**") ? p.is_cso_compliant() : true
//! p.labels.tier in ["front", "back"]
//! ```
//!
//! ## Package members
//!
//! | Member                         | Result                                  |
//! |--------------------------------|-----------------------------------------|
//! | `p.name`                       | package name                            |
//! | `p.labels`, `p.annotations`    | string maps                             |
//! | `p.match_path(glob)`           | glob match on the name                  |
//! | `p.has_secret(key)`            | case-insensitive key lookup             |
//! | `p.has_all_secrets([keys])`    | every key present                       |
//! | `p.has_any_secrets([keys])`    | at least one key present                |
//! | `p.is_cso_compliant()`         | name follows the CSO taxonomy           |
//! | `p.secret(key)`                | secret handle for the validators below  |
//!
//! Secret validators: `is_base64`, `is_required`, `is_url`, `is_uuid`,
//! `is_email`, `is_json`. A missing secret satisfies none of them.
//!
//! String methods: `startsWith`, `endsWith`, `contains`, `matches`, `size`.

mod checker;
mod eval;
mod lexer;
mod parser;

use tracing::trace;

use crate::core::domain::Package;
use crate::error::{Error, Result};

use checker::Type;
use parser::Expr;

/// A compiled boolean expression.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    expr: Expr,
}

impl Program {
    /// Compile `source`.
    ///
    /// # Errors
    ///
    /// Returns `Error::SelectorCompile` on syntax errors, unknown
    /// identifiers, fields or methods, argument mismatches, and expressions
    /// statically known not to produce a bool.
    pub fn compile(source: &str) -> Result<Self> {
        let fail = |reason: String| Error::selector(source, reason);

        let tokens = lexer::tokenize(source).map_err(fail)?;
        if tokens.is_empty() {
            return Err(fail("empty expression".to_string()));
        }
        let expr = parser::parse(tokens).map_err(fail)?;
        match checker::check(&expr).map_err(fail)? {
            Type::Bool | Type::Dyn => {}
            other => {
                return Err(fail(format!(
                    "expression must evaluate to bool, found {:?}",
                    other
                )))
            }
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `package`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Expression` on runtime failures (missing map keys,
    /// unpack errors, invalid patterns) and on non-boolean results.
    pub fn evaluate(&self, package: &Package) -> Result<bool> {
        let outcome = eval::evaluate(&self.expr, package).and_then(|value| match value {
            eval::Value::Bool(b) => Ok(b),
            other => Err(format!("expected bool result, got {:?}", other)),
        });
        trace!(expression = %self.source, package = %package.name, result = ?outcome, "evaluated");
        outcome.map_err(|reason| {
            Error::Expression(format!(
                "'{}' on package '{}': {}",
                self.source, package.name, reason
            ))
        })
    }
}
