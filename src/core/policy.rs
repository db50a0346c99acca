//! Embedded Rego policies.
//!
//! Wraps a `regorus` engine holding one policy module. The engine is
//! prepared once and cloned for every evaluation, so a [`Policy`] can be
//! shared between packages without carrying input state across them.

use tracing::trace;

use crate::error::{Error, Result};

/// A compiled Rego module queried for a single boolean rule.
#[derive(Clone)]
pub struct Policy {
    name: String,
    query: String,
    engine: regorus::Engine,
}

impl Policy {
    /// Load `source` and bind the query (`data.harp.matched` or
    /// `data.harp.compliant`).
    ///
    /// # Errors
    ///
    /// Returns `Error::SelectorCompile` when the module does not parse.
    pub fn compile(name: &str, source: &str, query: &str) -> Result<Self> {
        let mut engine = regorus::Engine::new();
        engine
            .add_policy(format!("{}.rego", name), source.to_string())
            .map_err(|e| Error::selector(name, e))?;
        Ok(Self {
            name: name.to_string(),
            query: query.to_string(),
            engine,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the query with `input` as the Rego `input` document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Expression` when evaluation fails or the query does
    /// not produce a boolean.
    pub fn evaluate(&self, input: &serde_json::Value) -> Result<bool> {
        let mut engine = self.engine.clone();
        let input = regorus::Value::from_json_str(&input.to_string())
            .map_err(|e| self.failure(e))?;
        engine.set_input(input);

        let result = engine
            .eval_rule(self.query.clone())
            .map_err(|e| self.failure(e))?;
        trace!(policy = %self.name, query = %self.query, "policy evaluated");

        match result {
            regorus::Value::Bool(b) => Ok(b),
            other => Err(Error::Expression(format!(
                "policy '{}': '{}' returned {:?} instead of a boolean",
                self.name, self.query, other
            ))),
        }
    }

    fn failure(&self, error: impl std::fmt::Display) -> Error {
        Error::Expression(format!("policy '{}': {}", self.name, error))
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}
