//! Test fixtures and constants.

use cellar::core::domain::{Bundle, Package, KV};

/// Standard application secrets.
pub const STANDARD_SECRETS: &[(&str, &str)] = &[
    ("DATABASE_URL", "postgres://localhost/mydb"),
    ("API_KEY", "c2stdGVzdC0xMjM0NQ=="),
    ("JWT_SECRET", "super-secret-jwt-token"),
];

/// CSO-compliant package names.
pub const APP_WEB: &str = "app/production/customer1/billing/v1/web";
pub const INFRA_DB: &str = "infra/aws/security/eu-central-1/rds";

/// Build a package holding string secrets.
pub fn package(name: &str, secrets: &[(&str, &str)]) -> Package {
    let mut package = Package::new(name);
    for (key, value) in secrets {
        package
            .chain_mut()
            .data
            .push(KV::new(*key, *value).expect("pack fixture value"));
    }
    package
}

/// Build a bundle from `(name, secrets)` pairs.
pub fn bundle(packages: &[(&str, &[(&str, &str)])]) -> Bundle {
    let mut bundle = Bundle::new();
    for (name, secrets) in packages {
        bundle.packages.push(package(name, secrets));
    }
    bundle
}

/// Two CSO packages: an application with the standard secrets and a
/// database holding credentials.
pub fn standard_bundle() -> Bundle {
    bundle(&[
        (APP_WEB, STANDARD_SECRETS),
        (INFRA_DB, &[("DB_USER", "admin"), ("DB_PASSWORD", "hunter2")][..]),
    ])
}
