//! End-to-end scenarios across the codec, diff, patch, lint and
//! encryption pipelines.

mod support;
use support::*;

use std::sync::Arc;

use cellar::core::cipher::{lock, unlock, TransformerRef};
use cellar::core::domain::{Bundle, KV};
use cellar::core::patch::{self, BundlePatch};
use cellar::core::ruleset::{self, Rule, RuleSet};
use cellar::core::{codec, diff, merkle};
use cellar::{Context, Error};

fn single(name: &str, key: &str, value: &str) -> Bundle {
    bundle(&[(name, &[(key, value)][..])])
}

#[test]
fn test_roundtrip_keeps_root_and_values() {
    init_tracing();
    let mut original = single("infra/db", "pwd", "s3cr3t");
    let bytes = codec::to_bytes(&mut original).unwrap();

    let loaded = codec::load(bytes.as_slice()).unwrap();
    assert_eq!(loaded.merkle_tree_root, original.merkle_tree_root);
    assert_eq!(loaded.merkle_tree_root, merkle::bundle_root(&loaded));
    assert_eq!(secret_text(&loaded, "infra/db", "pwd"), "s3cr3t");
}

#[test]
fn test_tampered_bytes_fail_integrity() {
    let mut original = single("infra/db", "pwd", "s3cr3t");
    let mut bytes = codec::to_bytes(&mut original).unwrap();

    let at = bytes
        .windows(6)
        .position(|w| w == b"s3cr3t")
        .expect("value bytes present in the encoding");
    bytes[at] ^= 0x20;

    assert!(matches!(
        codec::from_bytes(&bytes),
        Err(Error::Integrity(_))
    ));
}

#[test]
fn test_diff_lists_added_package_and_secrets() {
    let src = single("a/x", "k", "v");
    let mut dst = src.clone();
    dst.packages.push(package("a/y", &[("k2", "v2")]));

    let log = diff::diff(&src, &dst).unwrap();
    assert_oplog(&log, &["add/package a/y", "add/secret a/y#k2"]);
    assert_eq!(log.items()[1].value(), Some("v2"));
}

#[test]
fn test_patch_rename() {
    let document = r#"
apiVersion: harp.elastic.co/v1
kind: BundlePatch
meta:
  name: rename
spec:
  rules:
    - selector:
        matchPath:
          strict: app/old
      package:
        path:
          template: app/new
"#;
    let patch = BundlePatch::from_yaml(document).unwrap();
    let input = single("app/old", "k", "v");
    let output = patch::apply(&patch, &input, &serde_json::Value::Null).unwrap();

    assert_eq!(names(&output), vec!["app/new"]);
    assert_eq!(output.packages[0].annotations["patched"], "true");
    assert_eq!(names(&input), vec!["app/old"]);
}

#[test]
fn test_lint_violation() {
    let ruleset = RuleSet::new("app").with_rule(Rule::constraints(
        "api-key-required",
        "app/**",
        [r#"p.has_secret("API_KEY")"#],
    ));
    let bundle = single("app/x", "OTHER", "v");

    match ruleset::evaluate(&Context::background(), &bundle, &ruleset) {
        Err(Error::Violation { package, rule }) => {
            assert_eq!(package, "app/x");
            assert_eq!(rule, "api-key-required");
        }
        other => panic!("expected a violation, got {:?}", other),
    }
}

#[test]
fn test_lock_unlock_restores_root() {
    let ctx = Context::background();
    let mut bundle = standard_bundle();
    let root = merkle::bundle_root(&bundle);

    lock(&ctx, &mut bundle, &Base64Transformer).unwrap();
    assert!(bundle.packages.iter().all(|p| p.is_locked()));
    assert_eq!(merkle::bundle_root(&bundle), merkle::empty_root());

    let transformer: TransformerRef = Arc::new(Base64Transformer);
    unlock(&ctx, &mut bundle, &[transformer], false).unwrap();
    assert_eq!(merkle::bundle_root(&bundle), root);
    assert_eq!(secret_text(&bundle, INFRA_DB, "DB_PASSWORD"), "hunter2");
}

#[test]
fn test_zero_package_bundle() {
    let mut empty = Bundle::new();
    let bytes = codec::to_bytes(&mut empty).unwrap();
    let loaded = codec::from_bytes(&bytes).unwrap();
    assert!(loaded.packages.is_empty());
    assert_eq!(loaded.merkle_tree_root, merkle::empty_root());
    assert!(diff::diff(&loaded, &loaded).unwrap().is_empty());
}

#[test]
fn test_locked_only_bundle_roundtrips() {
    let ctx = Context::background();
    let mut bundle = standard_bundle();
    lock(&ctx, &mut bundle, &Base64Transformer).unwrap();

    let bytes = codec::to_bytes(&mut bundle).unwrap();
    let loaded = codec::from_bytes(&bytes).unwrap();
    assert_eq!(loaded.merkle_tree_root, merkle::empty_root());
    assert!(loaded.has_locked_packages());
    assert_eq!(loaded, bundle);
}

#[test]
fn test_key_lookup_ignores_case() {
    let mut bundle = Bundle::new();
    let mut pkg = package("app/x", &[]);
    pkg.chain_mut().data.push(KV::new("Foo", "bar").unwrap());
    bundle.packages.push(pkg);

    assert_eq!(secret_text(&bundle, "app/x", "foo"), "bar");
    assert_eq!(secret_text(&bundle, "app/x", "FOO"), "bar");
}
