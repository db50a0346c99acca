//! Bundle builders.
//!
//! Three ways to produce a fresh [`Bundle`]: from a JSON dump, from a plain
//! nested map, or by replaying the additions of an [`OpLog`].

use std::collections::BTreeMap;
use std::io::Read;

use serde::Serialize;
use tracing::debug;

use crate::core::codec;
use crate::core::domain::{Bundle, ItemType, OpLog, Operation, KV};
use crate::core::validation::{validate_package_name, validate_secret_key};
use crate::error::{Error, Result};

/// Decode a JSON dump; every value is packed again.
pub fn from_json<R: Read>(reader: R) -> Result<Bundle> {
    codec::from_json(reader)
}

/// One package per outer key, one KV per inner entry.
///
/// # Errors
///
/// Returns `Error::Validation` for invalid names or keys and `Error::Pack`
/// for values that cannot be encoded.
pub fn from_map<V: Serialize>(map: &BTreeMap<String, BTreeMap<String, V>>) -> Result<Bundle> {
    let mut bundle = Bundle::new();
    for (name, secrets) in map {
        validate_package_name(name)?;
        let package = bundle.package_or_insert(name);
        let chain = package.chain_mut();
        for (key, value) in secrets {
            validate_secret_key(name, key)?;
            chain.data.push(KV::new(key.as_str(), value)?);
        }
    }
    debug!(packages = bundle.packages.len(), "bundle built from map");
    Ok(bundle)
}

/// Replay the `add` and `replace` secret items of `oplog`.
///
/// Package items and removals carry nothing to rebuild and are skipped.
///
/// # Errors
///
/// Returns `Error::UnknownOp` for an unrecognised operation or item type,
/// and `Error::InvalidArgument` for a secret item without `<pkg>#<key>`
/// path or value.
pub fn from_oplog(oplog: &OpLog) -> Result<Bundle> {
    let mut bundle = Bundle::new();
    let mut replayed = 0usize;

    for item in oplog.iter() {
        if let Operation::Unknown(op) = item.operation() {
            return Err(Error::UnknownOp(format!("operation '{}' on '{}'", op, item.path())));
        }
        match item.item_type() {
            ItemType::Unknown(kind) => {
                return Err(Error::UnknownOp(format!("item type '{}' on '{}'", kind, item.path())))
            }
            ItemType::Package => continue,
            ItemType::Secret => {}
        }
        if *item.operation() == Operation::Remove {
            continue;
        }

        let (name, key) = item
            .secret_path()
            .ok_or_else(|| Error::InvalidArgument(format!("invalid secret path '{}'", item.path())))?;
        let value = item
            .value()
            .ok_or_else(|| Error::InvalidArgument(format!("secret '{}' has no value", item.path())))?;
        validate_package_name(name)?;
        validate_secret_key(name, key)?;

        let chain = bundle.package_or_insert(name).chain_mut();
        let kv = KV::new(key, value)?;
        match chain.data.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => *existing = kv,
            None => chain.data.push(kv),
        }
        replayed += 1;
    }

    debug!(items = oplog.len(), replayed, packages = bundle.packages.len(), "bundle built from oplog");
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::DiffItem;
    use serde_json::json;

    #[test]
    fn test_from_map_tags_types() {
        let map = BTreeMap::from([
            (
                "app/x".to_string(),
                BTreeMap::from([
                    ("port".to_string(), json!(8080)),
                    ("host".to_string(), json!("localhost")),
                ]),
            ),
            ("app/y".to_string(), BTreeMap::new()),
        ]);
        let bundle = from_map(&map).unwrap();
        assert_eq!(bundle.packages.len(), 2);
        let x = bundle.package("app/x").unwrap();
        assert_eq!(x.secret("port").unwrap().kind, "int64");
        assert_eq!(x.secret("host").unwrap().kind, "string");
        assert!(bundle.package("app/y").unwrap().kvs().is_empty());
    }

    #[test]
    fn test_from_map_rejects_bad_names() {
        let map = BTreeMap::from([("app//x".to_string(), BTreeMap::from([("k".to_string(), 1)]))]);
        assert!(matches!(from_map(&map), Err(Error::Validation(_))));
    }

    #[test]
    fn test_from_oplog_keeps_additions() {
        let mut log = OpLog::new();
        log.push(DiffItem::package(Operation::Add, "app/x"));
        log.push(DiffItem::secret(Operation::Add, "app/x", "k", Some("v1".into())));
        log.push(DiffItem::secret(Operation::Replace, "app/x", "k", Some("v2".into())));
        log.push(DiffItem::secret(Operation::Remove, "app/y", "gone", None));
        log.push(DiffItem::package(Operation::Remove, "app/z"));

        let bundle = from_oplog(&log).unwrap();
        assert_eq!(bundle.packages.len(), 1);
        let package = bundle.package("app/x").unwrap();
        assert_eq!(package.kvs().len(), 1);
        assert_eq!(package.secret("k").unwrap().to_text().unwrap(), "v2");
    }

    #[test]
    fn test_from_oplog_rejects_unknown() {
        let mut log = OpLog::new();
        log.push(DiffItem::new(
            Operation::Unknown("move".into()),
            ItemType::Secret,
            "app/x#k",
            Some("v".into()),
        ));
        assert!(matches!(from_oplog(&log), Err(Error::UnknownOp(_))));

        let mut log = OpLog::new();
        log.push(DiffItem::new(
            Operation::Add,
            ItemType::Unknown("label".into()),
            "app/x",
            None,
        ));
        assert!(matches!(from_oplog(&log), Err(Error::UnknownOp(_))));
    }

    #[test]
    fn test_from_json() {
        let doc = r#"{"packages":[{"name":"app/x","secrets":{"data":[{"key":"k","value":"v"}]}}]}"#;
        let bundle = from_json(doc.as_bytes()).unwrap();
        assert_eq!(bundle.package("app/x").unwrap().secret("k").unwrap().to_text().unwrap(), "v");
    }
}
