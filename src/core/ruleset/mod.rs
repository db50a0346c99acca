//! Package linting with declarative rulesets.
//!
//! A `RuleSet` document lists rules; each rule selects packages with a
//! path glob and checks them with one engine:
//!
//! - `constraints`: package expressions (see [`crate::core::expr`]), all of
//!   which must hold;
//! - `rego` / `regoFile`: a Rego module answering `data.harp.compliant`.
//!
//! ```yaml
//! apiVersion: harp.elastic.co/v1
//! kind: RuleSet
//! meta:
//!   name: app-secrets
//! spec:
//!   rules:
//!     - name: api-key
//!       path: "app/**"
//!       constraints:
//!         - p.has_secret("API_KEY")
//!         - p.secret("API_KEY").is_base64()
//! ```

mod engine;
mod linter;
mod spec;

pub use engine::{compile, ConstraintLinter, PackageLinter};
#[cfg(feature = "rego")]
pub use engine::RegoLinter;
pub use linter::{evaluate, Linter};
pub use spec::{Rule, RuleSet, RuleSetMeta, RuleSetSpec};
