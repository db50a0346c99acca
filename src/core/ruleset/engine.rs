//! Per-rule package linters.

use std::path::{Path, PathBuf};

use tracing::trace;

use crate::core::domain::Package;
use crate::core::expr::Program;
use crate::error::{Error, Result};

use super::spec::Rule;

#[cfg(feature = "rego")]
use crate::core::codec;
#[cfg(feature = "rego")]
use crate::core::constants::REGO_QUERY_COMPLIANT;
#[cfg(feature = "rego")]
use crate::core::policy::Policy;

/// Checks one package against one compiled rule.
pub trait PackageLinter {
    /// # Errors
    ///
    /// Returns `Error::Violation` when the package does not comply, and
    /// `Error::Expression` when the rule cannot be evaluated.
    fn evaluate(&self, package: &Package) -> Result<()>;
}

/// Dialect A: every constraint must evaluate to `true`.
#[derive(Debug)]
pub struct ConstraintLinter {
    rule: String,
    programs: Vec<Program>,
}

impl ConstraintLinter {
    pub fn new<S: AsRef<str>>(rule: &str, constraints: &[S]) -> Result<Self> {
        if constraints.is_empty() {
            return Err(Error::Validation(format!(
                "rule '{}' has an empty constraint list",
                rule
            )));
        }
        let programs = constraints
            .iter()
            .map(|c| Program::compile(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rule: rule.to_string(),
            programs,
        })
    }
}

impl PackageLinter for ConstraintLinter {
    fn evaluate(&self, package: &Package) -> Result<()> {
        for program in &self.programs {
            if !program.evaluate(package)? {
                trace!(rule = %self.rule, package = %package.name, constraint = %program.source(), "constraint failed");
                return Err(Error::Violation {
                    package: package.name.clone(),
                    rule: self.rule.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Dialect B: the module must answer `data.harp.compliant = true`.
#[cfg(feature = "rego")]
#[derive(Debug)]
pub struct RegoLinter {
    rule: String,
    policy: Policy,
}

#[cfg(feature = "rego")]
impl RegoLinter {
    pub fn new(rule: &str, module: &str) -> Result<Self> {
        Ok(Self {
            rule: rule.to_string(),
            policy: Policy::compile(rule, module, REGO_QUERY_COMPLIANT)?,
        })
    }
}

#[cfg(feature = "rego")]
impl PackageLinter for RegoLinter {
    fn evaluate(&self, package: &Package) -> Result<()> {
        let input = codec::package_json(package)?;
        if self.policy.evaluate(&input)? {
            Ok(())
        } else {
            Err(Error::Violation {
                package: package.name.clone(),
                rule: self.rule.clone(),
            })
        }
    }
}

/// Build the linter for `rule`. Relative `regoFile` paths resolve against
/// `base`, or the working directory when there is none.
///
/// # Errors
///
/// Returns `Error::Validation` unless exactly one of `constraints`, `rego`
/// and `regoFile` is set, and compile errors as `Error::SelectorCompile`.
pub fn compile(rule: &Rule, base: Option<&Path>) -> Result<Box<dyn PackageLinter>> {
    let set = [
        rule.constraints.is_some(),
        rule.rego.is_some(),
        rule.rego_file.is_some(),
    ];
    if set.iter().filter(|s| **s).count() != 1 {
        return Err(Error::Validation(format!(
            "rule '{}' must set exactly one of constraints, rego, regoFile",
            rule.name
        )));
    }

    if let Some(constraints) = &rule.constraints {
        return Ok(Box::new(ConstraintLinter::new(&rule.name, constraints)?));
    }
    let module = match (&rule.rego, &rule.rego_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(file)) => read_module(&resolve(base, file))?,
        (None, None) => {
            return Err(Error::Validation(format!(
                "rule '{}' has no engine",
                rule.name
            )))
        }
    };
    rego_linter(&rule.name, &module)
}

fn resolve(base: Option<&Path>, file: &str) -> PathBuf {
    let path = Path::new(file);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

fn read_module(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("rego file '{}'", path.display()))
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(feature = "rego")]
fn rego_linter(rule: &str, module: &str) -> Result<Box<dyn PackageLinter>> {
    Ok(Box::new(RegoLinter::new(rule, module)?))
}

#[cfg(not(feature = "rego"))]
fn rego_linter(rule: &str, _module: &str) -> Result<Box<dyn PackageLinter>> {
    Err(Error::Validation(format!(
        "rule '{}' needs the 'rego' feature",
        rule
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::KV;

    fn package(keys: &[&str]) -> Package {
        let mut package = Package::new("app/x");
        for key in keys {
            package.chain_mut().data.push(KV::new(*key, "dmFsdWU=").unwrap());
        }
        package
    }

    #[test]
    fn test_constraints() {
        let linter = ConstraintLinter::new(
            "api-key",
            &[r#"p.has_secret("API_KEY")"#, r#"p.secret("API_KEY").is_base64()"#],
        )
        .unwrap();
        assert!(linter.evaluate(&package(&["API_KEY"])).is_ok());
        match linter.evaluate(&package(&[])) {
            Err(Error::Violation { package, rule }) => {
                assert_eq!(package, "app/x");
                assert_eq!(rule, "api-key");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exactly_one_engine() {
        let mut rule = Rule::constraints("r", "app/**", ["p.has_secret(\"a\")"]);
        rule.rego = Some("package harp".into());
        assert!(matches!(compile(&rule, None), Err(Error::Validation(_))));

        let empty = Rule {
            name: "r".into(),
            path: "app/**".into(),
            ..Rule::default()
        };
        assert!(matches!(compile(&empty, None), Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_rego_file() {
        let rule = Rule {
            name: "r".into(),
            path: "app/**".into(),
            rego_file: Some("does-not-exist.rego".into()),
            ..Rule::default()
        };
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            compile(&rule, Some(dir.path())),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_relative_to_base() {
        assert_eq!(
            resolve(Some(Path::new("/policies")), "db.rego"),
            PathBuf::from("/policies/db.rego")
        );
        assert_eq!(
            resolve(Some(Path::new("/policies")), "/abs/db.rego"),
            PathBuf::from("/abs/db.rego")
        );
        assert_eq!(resolve(None, "db.rego"), PathBuf::from("db.rego"));
    }

    #[cfg(feature = "rego")]
    #[test]
    fn test_rego_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("named.rego"),
            "package harp\n\ndefault compliant = false\n\ncompliant {\n    startswith(input.name, \"app/\")\n}\n",
        )
        .unwrap();
        let rule = Rule {
            name: "named".into(),
            path: "**".into(),
            rego_file: Some("named.rego".into()),
            ..Rule::default()
        };
        let linter = compile(&rule, Some(dir.path())).unwrap();
        assert!(linter.evaluate(&package(&[])).is_ok());
        assert!(matches!(
            linter.evaluate(&Package::new("infra/x")),
            Err(Error::Violation { .. })
        ));
    }
}
