//! Bundle diff.
//!
//! Compares two bundles and produces the ordered [`OpLog`] that turns the
//! source into the destination. Packages are matched by exact name and
//! secrets by exact key. Locked chains are treated as empty.

use std::collections::HashMap;

use subtle::ConstantTimeEq;
use tracing::debug;

use crate::core::domain::{Bundle, DiffItem, OpLog, Operation, Package, KV};
use crate::error::{Error, Result};

/// Compute the operations transforming `src` into `dst`.
///
/// Emission order:
/// 1. packages only in `dst`, each followed by its secrets (`add`);
/// 2. packages only in `src` (`remove`);
/// 3. for shared packages, in `dst` order: secret `add`/`replace` following
///    the destination key order, then secret `remove` following the source
///    key order.
///
/// # Errors
///
/// Returns `Error::Diff` naming the package and key whose value could not
/// be unpacked.
pub fn diff(src: &Bundle, dst: &Bundle) -> Result<OpLog> {
    let src_index = index(src);
    let dst_index = index(dst);
    let mut log = OpLog::new();

    for package in &dst.packages {
        if src_index.contains_key(package.name.as_str()) {
            continue;
        }
        log.push(DiffItem::package(Operation::Add, &package.name));
        for kv in package.kvs() {
            log.push(DiffItem::secret(
                Operation::Add,
                &package.name,
                &kv.key,
                Some(render(&package.name, kv)?),
            ));
        }
    }

    for package in &src.packages {
        if !dst_index.contains_key(package.name.as_str()) {
            log.push(DiffItem::package(Operation::Remove, &package.name));
        }
    }

    for package in &dst.packages {
        if let Some(previous) = src_index.get(package.name.as_str()) {
            diff_secrets(previous, package, &mut log)?;
        }
    }

    debug!(
        src = src.packages.len(),
        dst = dst.packages.len(),
        operations = log.len(),
        "bundle diff computed"
    );
    Ok(log)
}

fn diff_secrets(src: &Package, dst: &Package, log: &mut OpLog) -> Result<()> {
    let before: HashMap<&str, &KV> = src.kvs().iter().map(|kv| (kv.key.as_str(), kv)).collect();
    let after: HashMap<&str, &KV> = dst.kvs().iter().map(|kv| (kv.key.as_str(), kv)).collect();

    for kv in dst.kvs() {
        let operation = match before.get(kv.key.as_str()) {
            None => Operation::Add,
            Some(old) if !bool::from(old.value.as_slice().ct_eq(kv.value.as_slice())) => {
                Operation::Replace
            }
            Some(_) => continue,
        };
        log.push(DiffItem::secret(
            operation,
            &dst.name,
            &kv.key,
            Some(render(&dst.name, kv)?),
        ));
    }

    for kv in src.kvs() {
        if !after.contains_key(kv.key.as_str()) {
            log.push(DiffItem::secret(Operation::Remove, &src.name, &kv.key, None));
        }
    }

    Ok(())
}

fn index(bundle: &Bundle) -> HashMap<&str, &Package> {
    bundle
        .packages
        .iter()
        .map(|p| (p.name.as_str(), p))
        .collect()
}

fn render(package: &str, kv: &KV) -> Result<String> {
    kv.to_text().map_err(|source| Error::Diff {
        package: package.to_string(),
        key: kv.key.clone(),
        source: Box::new(source),
    })
}
