//! Property-based tests for the bundle laws: codec round-trips, Merkle
//! order independence, lock/unlock, identity patch and self-diff, over
//! every value kind the packer preserves.

mod support;
use support::*;

use std::collections::BTreeMap;

use cellar::core::cipher::{lock, unlock, TransformerRef};
use cellar::core::domain::{Bundle, Package, KV};
use cellar::core::packer::Value;
use cellar::core::patch::{self, BundlePatch};
use cellar::core::{builder, codec, diff, merkle};
use cellar::Context;
use proptest::prelude::*;

type Secrets = BTreeMap<String, BTreeMap<String, String>>;

fn secrets() -> impl Strategy<Value = Secrets> {
    prop::collection::btree_map(
        "[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}",
        prop::collection::btree_map("[A-Z][A-Z0-9_]{0,10}", "\\PC{0,40}", 0..5),
        0..6,
    )
}

fn build(map: &Secrets) -> Bundle {
    builder::from_map(map).expect("valid generated bundle")
}

type TypedSecrets = BTreeMap<String, BTreeMap<String, Value>>;

/// Values JSON can carry without a type tag; nested inside composites.
fn natural() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::F64),
        "\\PC{0,24}".prop_map(Value::from),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        natural(),
        ((i64::MAX as u64) + 1..=u64::MAX).prop_map(Value::from),
        any::<f32>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::F32),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Binary),
        prop::collection::vec(natural(), 0..4).prop_map(Value::Array),
        prop::collection::btree_map("[a-z]{1,6}", natural(), 0..4).prop_map(|entries| {
            Value::Map(entries.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
        }),
    ]
}

fn typed_secrets() -> impl Strategy<Value = TypedSecrets> {
    prop::collection::btree_map(
        "[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}",
        prop::collection::btree_map("[A-Z][A-Z0-9_]{0,10}", value(), 0..5),
        0..6,
    )
}

fn build_typed(map: &TypedSecrets) -> Bundle {
    let mut bundle = Bundle::new();
    for (name, secrets) in map {
        let mut package = Package::new(name.as_str());
        for (key, value) in secrets {
            package
                .chain_mut()
                .data
                .push(KV::from_value(key.as_str(), value).expect("packable value"));
        }
        bundle.packages.push(package);
    }
    bundle
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn kv_text_roundtrip(key in "[A-Za-z_]{1,16}", value in "\\PC{0,64}") {
        let kv = KV::new(key.as_str(), value.as_str()).unwrap();
        prop_assert_eq!(kv.kind.as_str(), "string");
        prop_assert_eq!(kv.to_text().unwrap(), value);
    }

    #[test]
    fn merkle_root_ignores_package_order(map in typed_secrets()) {
        let bundle = build_typed(&map);
        let mut reversed = bundle.clone();
        reversed.packages.reverse();
        prop_assert_eq!(merkle::bundle_root(&bundle), merkle::bundle_root(&reversed));
    }

    #[test]
    fn binary_roundtrip(map in typed_secrets()) {
        let mut bundle = build_typed(&map);
        let bytes = codec::to_bytes(&mut bundle).unwrap();
        let loaded = codec::from_bytes(&bytes).unwrap();
        prop_assert_eq!(loaded, bundle);
    }

    #[test]
    fn json_roundtrip_keeps_root(map in typed_secrets()) {
        let bundle = build_typed(&map);
        let mut text = Vec::new();
        codec::dump_json(&bundle, &mut text).unwrap();
        let restored = codec::from_json(text.as_slice()).unwrap();
        prop_assert_eq!(merkle::bundle_root(&restored), merkle::bundle_root(&bundle));
        prop_assert_eq!(restored, bundle);
    }

    #[test]
    fn lock_unlock_is_identity(map in typed_secrets()) {
        let ctx = Context::background();
        let original = build_typed(&map);
        let mut bundle = original.clone();

        lock(&ctx, &mut bundle, &Base64Transformer).unwrap();
        let transformer: TransformerRef = std::sync::Arc::new(Base64Transformer);
        unlock(&ctx, &mut bundle, &[transformer], false).unwrap();
        prop_assert_eq!(merkle::bundle_root(&bundle), merkle::bundle_root(&original));
        prop_assert_eq!(bundle, original);
    }

    #[test]
    fn empty_patch_is_identity(map in typed_secrets()) {
        let bundle = build_typed(&map);
        let output = patch::apply(&BundlePatch::new("noop"), &bundle, &serde_json::Value::Null).unwrap();
        prop_assert_eq!(output, bundle);
    }

    #[test]
    fn self_diff_is_empty(map in typed_secrets()) {
        let bundle = build_typed(&map);
        prop_assert!(diff::diff(&bundle, &bundle).unwrap().is_empty());
    }

    #[test]
    fn diff_replays_into_destination(src in secrets(), dst in secrets()) {
        let log = diff::diff(&build(&src), &build(&dst)).unwrap();
        let replayed = builder::from_oplog(&log).unwrap();

        // Every secret added or changed in `dst` is reproduced.
        for item in log.added().into_iter().chain(log.replaced()) {
            if let Some((package, key)) = item.secret_path() {
                prop_assert_eq!(secret_text(&replayed, package, key), dst[package][key].clone());
            }
        }
    }
}
