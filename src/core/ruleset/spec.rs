//! RuleSet document model.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::core::constants::{API_VERSION, KIND_RULESET};
use crate::core::patch::checksum;
use crate::error::{Error, Result};

/// A `RuleSet` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RuleSetMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<RuleSetSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetSpec {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One lint rule: a path glob and exactly one of `constraints`, `rego`,
/// `regoFile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rego: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rego_file: Option<String>,
}

impl RuleSet {
    /// Empty, valid ruleset named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND_RULESET.to_string(),
            meta: Some(RuleSetMeta {
                name: name.into(),
                description: String::new(),
            }),
            spec: Some(RuleSetSpec::default()),
        }
    }

    /// Append a rule; builder style, mostly for tests and programmatic use.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.spec.get_or_insert_with(RuleSetSpec::default).rules.push(rule);
        self
    }

    /// Decode a YAML or JSON document and validate it.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let ruleset: Self = serde_yaml::from_reader(reader)
            .map_err(|e| Error::Validation(format!("unable to decode ruleset: {}", e)))?;
        ruleset.validate()?;
        Ok(ruleset)
    }

    pub fn from_yaml(document: &str) -> Result<Self> {
        Self::from_reader(document.as_bytes())
    }

    /// Check the header and that every rule is named.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(Error::Validation(format!(
                "apiVersion should be '{}', got '{}'",
                API_VERSION, self.api_version
            )));
        }
        if self.kind != KIND_RULESET {
            return Err(Error::Validation(format!(
                "kind should be '{}', got '{}'",
                KIND_RULESET, self.kind
            )));
        }
        if self.meta.is_none() {
            return Err(Error::Validation("meta should be set".into()));
        }
        let Some(spec) = &self.spec else {
            return Err(Error::Validation("spec should be set".into()));
        };
        if let Some(index) = spec.rules.iter().position(|r| r.name.trim().is_empty()) {
            return Err(Error::Validation(format!("rule #{} has no name", index)));
        }
        Ok(())
    }

    /// Stable identifier, computed like the patch checksum.
    pub fn checksum(&self) -> Result<String> {
        checksum(self)
    }

    pub fn name(&self) -> &str {
        self.meta.as_ref().map_or("", |m| m.name.as_str())
    }

    pub fn rules(&self) -> &[Rule] {
        self.spec.as_ref().map_or(&[], |s| s.rules.as_slice())
    }
}

impl Rule {
    /// Rule checked with dialect A expressions.
    pub fn constraints<S: Into<String>>(
        name: impl Into<String>,
        path: impl Into<String>,
        constraints: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            constraints: Some(constraints.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Rule checked with an inline Rego module.
    pub fn rego(name: impl Into<String>, path: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            rego: Some(module.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULESET: &str = r#"
apiVersion: harp.elastic.co/v1
kind: RuleSet
meta:
  name: app-secrets
  description: Application packages must carry an API key
spec:
  rules:
    - name: api-key
      path: "app/**"
      constraints:
        - p.has_secret("API_KEY")
    - name: db
      path: "infra/**"
      regoFile: db.rego
"#;

    #[test]
    fn test_decode() {
        let ruleset = RuleSet::from_yaml(RULESET).unwrap();
        assert_eq!(ruleset.name(), "app-secrets");
        assert_eq!(ruleset.rules().len(), 2);
        assert_eq!(
            ruleset.rules()[0].constraints.as_deref(),
            Some(&[r#"p.has_secret("API_KEY")"#.to_string()][..])
        );
        assert_eq!(ruleset.rules()[1].rego_file.as_deref(), Some("db.rego"));
    }

    #[test]
    fn test_validation() {
        assert!(RuleSet::new("x").validate().is_ok());

        let mut wrong_kind = RuleSet::new("x");
        wrong_kind.kind = "BundlePatch".into();
        assert!(matches!(wrong_kind.validate(), Err(Error::Validation(_))));

        let mut no_spec = RuleSet::new("x");
        no_spec.spec = None;
        assert!(no_spec.validate().is_err());

        let unnamed = RuleSet::new("x").with_rule(Rule::constraints("", "app/**", ["true"]));
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_checksum() {
        let a = RuleSet::from_yaml(RULESET).unwrap();
        let sum = a.checksum().unwrap();
        assert_eq!(sum, RuleSet::from_yaml(RULESET).unwrap().checksum().unwrap());
        assert_ne!(sum, RuleSet::new("x").checksum().unwrap());
    }
}
