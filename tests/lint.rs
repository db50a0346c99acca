//! RuleSet linting tests.

mod support;
use support::*;

use cellar::core::config::Config;
use cellar::core::ruleset::{Linter, RuleSet};
use cellar::{Context, Error};

const RULESET: &str = r#"
apiVersion: harp.elastic.co/v1
kind: RuleSet
meta:
  name: production
  description: Baseline checks for production bundles
spec:
  rules:
    - name: cso-paths
      path: "**"
      constraints:
        - p.is_cso_compliant()
    - name: app-secrets
      path: "app/production/**"
      constraints:
        - p.has_all_secrets(["DATABASE_URL", "API_KEY"])
        - p.secret("API_KEY").is_base64()
        - p.secret("DATABASE_URL").is_url()
    - name: db-credentials
      path: "infra/**"
      constraints:
        - p.has_secret("DB_PASSWORD") && p.secret("DB_PASSWORD").is_required()
"#;

#[test]
fn test_standard_bundle_is_compliant() {
    init_tracing();
    let ruleset = RuleSet::from_yaml(RULESET).unwrap();
    Linter::new()
        .evaluate(&Context::background(), &standard_bundle(), &ruleset)
        .unwrap();
}

#[test]
fn test_first_violation_is_reported() {
    let ruleset = RuleSet::from_yaml(RULESET).unwrap();
    let mut bundle = standard_bundle();
    bundle.packages.push(package("app/x", &[]));

    match Linter::new().evaluate(&Context::background(), &bundle, &ruleset) {
        Err(Error::Violation { package, rule }) => {
            assert_eq!(package, "app/x");
            assert_eq!(rule, "cso-paths");
        }
        other => panic!("expected a violation, got {:?}", other),
    }
}

#[test]
fn test_validator_failure() {
    let ruleset = RuleSet::from_yaml(RULESET).unwrap();
    let bundle = bundle(&[
        (APP_WEB, &[("DATABASE_URL", "not a url"), ("API_KEY", "c2s=")][..]),
        (INFRA_DB, &[("DB_PASSWORD", "x")][..]),
    ]);
    assert!(matches!(
        Linter::new().evaluate(&Context::background(), &bundle, &ruleset),
        Err(Error::Violation { ref rule, .. }) if rule == "app-secrets"
    ));
}

#[test]
fn test_unmatched_rule() {
    let ruleset = RuleSet::from_yaml(RULESET).unwrap();
    let bundle = bundle(&[(APP_WEB, STANDARD_SECRETS)]);
    assert!(matches!(
        Linter::new().evaluate(&Context::background(), &bundle, &ruleset),
        Err(Error::UnmatchedRule(ref rule)) if rule == "db-credentials"
    ));
}

#[test]
fn test_non_boolean_constraint_is_an_error() {
    let document = r#"
apiVersion: harp.elastic.co/v1
kind: RuleSet
meta:
  name: broken
spec:
  rules:
    - name: tier
      path: "app/**"
      constraints:
        - p.labels.tier
"#;
    let ruleset = RuleSet::from_yaml(document).unwrap();
    let mut bundle = standard_bundle();
    bundle
        .package_mut(APP_WEB)
        .unwrap()
        .labels
        .insert("tier".into(), "front".into());
    assert!(matches!(
        Linter::new().evaluate(&Context::background(), &bundle, &ruleset),
        Err(Error::Expression(_))
    ));
}

#[cfg(feature = "rego")]
#[test]
fn test_rego_file_from_policy_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("db.rego"),
        r#"package harp

default compliant = false

compliant {
    input.secrets.data[_].key == "DB_PASSWORD"
}
"#,
    )
    .unwrap();
    let config = Config::from_toml_str(&format!(
        "[lint]\npolicy_root = {:?}\n",
        dir.path().display().to_string()
    ))
    .unwrap();

    let document = r#"
apiVersion: harp.elastic.co/v1
kind: RuleSet
meta:
  name: rego
spec:
  rules:
    - name: db-password
      path: "infra/**"
      regoFile: db.rego
"#;
    let ruleset = RuleSet::from_yaml(document).unwrap();
    let linter = Linter::from_config(&config);
    linter
        .evaluate(&Context::background(), &standard_bundle(), &ruleset)
        .unwrap();

    let mut bundle = standard_bundle();
    if let Some(chain) = bundle.package_mut(INFRA_DB).unwrap().secrets.as_mut() {
        chain.remove("DB_PASSWORD");
    }
    assert!(matches!(
        linter.evaluate(&Context::background(), &bundle, &ruleset),
        Err(Error::Violation { .. })
    ));
}

#[test]
fn test_canceled_context() {
    let ruleset = RuleSet::from_yaml(RULESET).unwrap();
    let ctx = Context::background();
    ctx.cancel();
    assert!(matches!(
        Linter::new().evaluate(&ctx, &standard_bundle(), &ruleset),
        Err(Error::Canceled)
    ));
}
