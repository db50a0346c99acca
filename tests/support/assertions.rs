//! Test assertion helpers.

use cellar::core::domain::{Bundle, OpLog};

/// Package names in stored order.
pub fn names(bundle: &Bundle) -> Vec<&str> {
    bundle.packages.iter().map(|p| p.name.as_str()).collect()
}

/// Text value of `package#key`, panicking with context when absent.
pub fn secret_text(bundle: &Bundle, package: &str, key: &str) -> String {
    bundle
        .package(package)
        .unwrap_or_else(|| panic!("missing package '{}'", package))
        .secret(key)
        .unwrap_or_else(|| panic!("missing secret '{}#{}'", package, key))
        .to_text()
        .expect("unpack secret")
}

/// Oplog rendered as `op/type path` lines.
pub fn oplog_lines(log: &OpLog) -> Vec<String> {
    log.iter().map(ToString::to_string).collect()
}

/// Assert an oplog has the expected `op/type path` lines, in order.
pub fn assert_oplog(log: &OpLog, expected: &[&str]) {
    let lines = oplog_lines(log);
    assert_eq!(
        lines, expected,
        "oplog mismatch:\n  got:      {:?}\n  expected: {:?}",
        lines, expected
    );
}
