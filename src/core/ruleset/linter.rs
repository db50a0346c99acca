//! Bundle linting.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::core::config::Config;
use crate::core::context::Context;
use crate::core::domain::Bundle;
use crate::core::glob::compile_glob;
use crate::error::{Error, Result};

use super::engine;
use super::spec::RuleSet;

/// Evaluates rulesets against bundles.
#[derive(Debug, Clone, Default)]
pub struct Linter {
    policy_root: Option<PathBuf>,
}

impl Linter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative `regoFile` references against `root`.
    pub fn with_policy_root(root: impl Into<PathBuf>) -> Self {
        Self {
            policy_root: Some(root.into()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            policy_root: config.lint.policy_root.clone(),
        }
    }

    pub fn policy_root(&self) -> Option<&Path> {
        self.policy_root.as_deref()
    }

    /// Check every package of `bundle` against `ruleset`.
    ///
    /// Rules run in document order. Each rule's glob and engine are
    /// compiled once; the first failing package stops the evaluation.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` for an invalid header or rule
    /// - `Error::SelectorCompile` for a bad glob or expression
    /// - `Error::Violation` for the first non-compliant package
    /// - `Error::UnmatchedRule` for a rule whose glob matches nothing
    /// - `Error::Expression` when a rule cannot be evaluated
    /// - `Error::Canceled` when `ctx` is done
    pub fn evaluate(&self, ctx: &Context, bundle: &Bundle, ruleset: &RuleSet) -> Result<()> {
        ruleset.validate()?;

        for rule in ruleset.rules() {
            let glob = compile_glob(&rule.path)?;
            let linter = engine::compile(rule, self.policy_root())?;

            let mut matched = 0usize;
            for package in &bundle.packages {
                ctx.check()?;
                if !glob.is_match(&package.name) {
                    continue;
                }
                matched += 1;
                trace!(rule = %rule.name, package = %package.name, "checking package");
                linter.evaluate(package)?;
            }

            if matched == 0 {
                return Err(Error::UnmatchedRule(rule.name.clone()));
            }
            debug!(ruleset = %ruleset.name(), rule = %rule.name, packages = matched, "rule passed");
        }

        debug!(ruleset = %ruleset.name(), rules = ruleset.rules().len(), "bundle is compliant");
        Ok(())
    }
}

/// [`Linter::evaluate`] without a policy root.
pub fn evaluate(ctx: &Context, bundle: &Bundle, ruleset: &RuleSet) -> Result<()> {
    Linter::new().evaluate(ctx, bundle, ruleset)
}
