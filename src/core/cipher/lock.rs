//! Lock / unlock pipeline.
//!
//! A locked chain holds the encrypted JSON object
//! `{key: {"type": tag, "value": value}, ...}` of its former KV entries,
//! in chain order. The type tag restores the kinds JSON flattens.
//! Cleartext buffers and the string values unpacked on the way are wiped
//! once consumed. Packages are processed in bundle order and mutated in
//! place; on error the packages already handled stay transformed.

use serde::ser::{SerializeMap, Serializer as _};
use serde::Serialize;
use tracing::{debug, trace, warn};
use zeroize::{Zeroize, Zeroizing};

use super::{Keyring, Transformer, TransformerRef};
use crate::core::constants::ANNOTATION_ENCRYPTION_KEY_ALIAS;
use crate::core::context::Context;
use crate::core::domain::{Bundle, Package, KV};
use crate::error::{Error, Result};

/// Encrypt every unlocked package with `transformer`.
///
/// Packages without a chain and chains already locked are left alone.
///
/// # Errors
///
/// `Error::Canceled` when the context is done, `Error::Encrypt` naming the
/// package whose values could not be serialized or encrypted.
pub fn lock(ctx: &Context, bundle: &mut Bundle, transformer: &dyn Transformer) -> Result<()> {
    let mut locked = 0usize;
    for package in &mut bundle.packages {
        ctx.check()?;
        if lock_package(ctx, package, transformer)? {
            locked += 1;
        }
    }
    debug!(
        transformer = transformer.name(),
        packages = locked,
        "bundle locked"
    );
    Ok(())
}

/// Encrypt only packages carrying the encryption key alias annotation.
///
/// The annotation value names a transformer in `keyring`. An unknown alias
/// fails with `Error::KeyNotFound`, unless `skip_unresolved` is set, in
/// which case the package is left unlocked.
pub fn partial_lock(
    ctx: &Context,
    bundle: &mut Bundle,
    keyring: &Keyring,
    skip_unresolved: bool,
) -> Result<()> {
    let mut locked = 0usize;
    for package in &mut bundle.packages {
        ctx.check()?;
        let Some(alias) = package.annotations.get(ANNOTATION_ENCRYPTION_KEY_ALIAS) else {
            continue;
        };

        let transformer = match keyring.get(alias) {
            Some(transformer) => transformer,
            None if skip_unresolved => {
                warn!(package = %package.name, alias = %alias, "unresolved key alias, skipping");
                continue;
            }
            None => {
                return Err(Error::KeyNotFound {
                    package: package.name.clone(),
                    alias: alias.clone(),
                })
            }
        };

        if lock_package(ctx, package, transformer.as_ref())? {
            locked += 1;
        }
    }
    debug!(packages = locked, "bundle partially locked");
    Ok(())
}

/// Decrypt every locked package with the first transformer that succeeds.
///
/// Entries are restored in their original order and kinds. When no
/// transformer succeeds the call fails with `Error::Decrypt`, unless
/// `skip_undecryptable` is set, in which case the package stays locked.
pub fn unlock(
    ctx: &Context,
    bundle: &mut Bundle,
    transformers: &[TransformerRef],
    skip_undecryptable: bool,
) -> Result<()> {
    let mut unlocked = 0usize;
    for package in &mut bundle.packages {
        ctx.check()?;
        let Some(chain) = package.secrets.as_mut() else {
            continue;
        };
        let Some(ciphertext) = chain.locked.as_deref() else {
            continue;
        };

        let mut last_error = None;
        let mut plaintext = None;
        for transformer in transformers {
            match transformer.decrypt(ctx, ciphertext) {
                Ok(bytes) => {
                    trace!(package = %package.name, transformer = transformer.name(), "decrypted");
                    plaintext = Some(Zeroizing::new(bytes));
                    break;
                }
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => {
                    trace!(package = %package.name, transformer = transformer.name(), "transformer rejected");
                    last_error = Some(e);
                }
            }
        }

        let Some(plaintext) = plaintext else {
            if skip_undecryptable {
                warn!(package = %package.name, "no transformer could decrypt, skipping");
                continue;
            }
            return Err(Error::Decrypt {
                package: package.name.clone(),
                reason: last_error.map_or_else(
                    || "no transformer available".to_string(),
                    |e| reason(&e),
                ),
            });
        };

        let data = restore(&package.name, &plaintext)?;
        chain.wipe_locked();
        chain.data = data;
        unlocked += 1;
    }
    debug!(packages = unlocked, "bundle unlocked");
    Ok(())
}

/// Returns whether the package was locked by this call.
fn lock_package(ctx: &Context, package: &mut Package, transformer: &dyn Transformer) -> Result<bool> {
    let Some(chain) = package.secrets.as_mut() else {
        return Ok(false);
    };
    if chain.is_locked() {
        trace!(package = %package.name, "already locked");
        return Ok(false);
    }

    let mut cleartext = Zeroizing::new(Vec::with_capacity(payload_hint(&chain.data)));
    write_entries(&chain.data, &mut cleartext).map_err(|reason| Error::Encrypt {
        package: package.name.clone(),
        reason,
    })?;

    let ciphertext = match transformer.encrypt(ctx, &cleartext) {
        Ok(ciphertext) => ciphertext,
        Err(Error::Canceled) => return Err(Error::Canceled),
        Err(e) => {
            return Err(Error::Encrypt {
                package: package.name.clone(),
                reason: reason(&e),
            })
        }
    };

    chain.data.clear();
    chain.locked = Some(ciphertext);
    trace!(package = %package.name, transformer = transformer.name(), "locked");
    Ok(true)
}

#[derive(Serialize)]
struct SealedEntry<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a serde_json::Value,
}

/// Upper bound on the payload size; the buffer must not reallocate.
fn payload_hint(data: &[KV]) -> usize {
    2 + data
        .iter()
        .map(|kv| 32 + 2 * kv.key.len() + kv.kind.len() + 8 * kv.value.len())
        .sum::<usize>()
}

fn write_entries(data: &[KV], out: &mut Vec<u8>) -> std::result::Result<(), String> {
    let mut serializer = serde_json::Serializer::new(out);
    let mut entries = (&mut serializer)
        .serialize_map(Some(data.len()))
        .map_err(|e| e.to_string())?;
    for kv in data {
        let mut value = kv
            .to_json()
            .map_err(|e| format!("unable to unpack '{}': {}", kv.key, e))?;
        let written = entries.serialize_entry(
            &kv.key,
            &SealedEntry {
                kind: &kv.kind,
                value: &value,
            },
        );
        wipe_json(&mut value);
        written.map_err(|e| e.to_string())?;
    }
    entries.end().map_err(|e| e.to_string())
}

fn restore(package: &str, plaintext: &[u8]) -> Result<Vec<KV>> {
    let mut entries: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(plaintext).map_err(|e| Error::Decrypt {
            package: package.to_string(),
            reason: format!("decrypted payload is not a JSON object: {}", e),
        })?;
    let restored: Result<Vec<KV>> = entries
        .iter()
        .map(|(key, entry)| {
            let kind = entry
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            let value = entry.get("value").ok_or_else(|| Error::Decrypt {
                package: package.to_string(),
                reason: format!("entry '{}' has no value", key),
            })?;
            KV::from_tagged_json(key.as_str(), kind, value)
        })
        .collect();
    entries.values_mut().for_each(wipe_json);
    restored
}

/// Overwrite every string held by a JSON value.
fn wipe_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(text) => text.zeroize(),
        serde_json::Value::Array(items) => items.iter_mut().for_each(wipe_json),
        serde_json::Value::Object(map) => map.values_mut().for_each(wipe_json),
        _ => {}
    }
}

fn reason(error: &Error) -> String {
    match error {
        Error::Encrypt { reason, .. } | Error::Decrypt { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::{merkle, packer};

    /// Reverses bytes and refuses payloads not produced by itself.
    struct Mirror;

    impl Transformer for Mirror {
        fn name(&self) -> &str {
            "mirror"
        }
        fn encrypt(&self, ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
            ctx.check()?;
            let mut out = vec![b'M'];
            out.extend(plaintext.iter().rev());
            Ok(out)
        }
        fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
            ctx.check()?;
            match ciphertext.split_first() {
                Some((b'M', rest)) => Ok(rest.iter().rev().copied().collect()),
                _ => Err(Error::InvalidArgument("not mirrored".into())),
            }
        }
    }

    struct Failing;

    impl Transformer for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn encrypt(&self, _: &Context, _: &[u8]) -> Result<Vec<u8>> {
            Err(Error::InvalidArgument("boom".into()))
        }
        fn decrypt(&self, _: &Context, _: &[u8]) -> Result<Vec<u8>> {
            Err(Error::InvalidArgument("boom".into()))
        }
    }

    fn sample() -> Bundle {
        let mut bundle = Bundle::new();
        let mut db = Package::new("infra/db");
        db.chain_mut().data.push(KV::new("user", "admin").unwrap());
        db.chain_mut().data.push(KV::new("pwd", "s3cr3t").unwrap());
        let mut api = Package::new("app/api");
        api.annotations.insert(
            ANNOTATION_ENCRYPTION_KEY_ALIAS.to_string(),
            "production".to_string(),
        );
        api.chain_mut().data.push(KV::new("port", &8080u16).unwrap());
        bundle.packages.push(db);
        bundle.packages.push(api);
        bundle
    }

    #[test]
    fn test_lock_then_unlock_restores_root() {
        let ctx = Context::background();
        let mut bundle = sample();
        let before = merkle::bundle_root(&bundle);

        lock(&ctx, &mut bundle, &Mirror).unwrap();
        assert!(bundle.packages.iter().all(Package::is_locked));
        assert_eq!(merkle::bundle_root(&bundle), merkle::empty_root());

        let transformers: Vec<TransformerRef> = vec![Arc::new(Mirror)];
        unlock(&ctx, &mut bundle, &transformers, false).unwrap();
        assert!(!bundle.has_locked_packages());
        assert_eq!(merkle::bundle_root(&bundle), before);
        assert_eq!(bundle.packages[1].secret("port").unwrap().kind, "int64");
    }

    #[test]
    fn test_unlock_restores_kinds_and_order() {
        let ctx = Context::background();
        let mut bundle = sample();
        let chain = bundle.packages[0].chain_mut();
        let cert = packer::Value::Binary(vec![0xde, 0xad, 0xbe, 0xef]);
        chain.data.push(KV::from_value("cert", &cert).unwrap());
        chain.data.push(KV::new("ratio", &1.5f32).unwrap());
        let original = bundle.clone();

        lock(&ctx, &mut bundle, &Mirror).unwrap();
        let transformers: Vec<TransformerRef> = vec![Arc::new(Mirror)];
        unlock(&ctx, &mut bundle, &transformers, false).unwrap();

        let restored: Vec<_> = bundle.packages[0]
            .kvs()
            .iter()
            .map(|kv| (kv.key.as_str(), kv.kind.as_str()))
            .collect();
        assert_eq!(
            restored,
            [("user", "string"), ("pwd", "string"), ("cert", "bytes"), ("ratio", "float32")]
        );
        assert_eq!(bundle, original);
    }

    #[test]
    fn test_locked_payload_carries_type_tags() {
        let ctx = Context::background();
        let mut bundle = sample();
        lock(&ctx, &mut bundle, &Mirror).unwrap();

        let ciphertext = bundle.packages[1].secrets.as_ref().unwrap().locked.clone().unwrap();
        let plaintext = Mirror.decrypt(&ctx, &ciphertext).unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(payload, serde_json::json!({"port": {"type": "int64", "value": 8080}}));
    }

    #[test]
    fn test_unlock_rejects_entry_without_value() {
        let ctx = Context::background();
        let mut bundle = sample();
        let mut payload = vec![b'M'];
        payload.extend(br#"{"user":{"type":"string"}}"#.iter().rev());
        let chain = bundle.packages[0].chain_mut();
        chain.data.clear();
        chain.locked = Some(payload);

        let transformers: Vec<TransformerRef> = vec![Arc::new(Mirror)];
        match unlock(&ctx, &mut bundle, &transformers, false) {
            Err(Error::Decrypt { package, reason }) => {
                assert_eq!(package, "infra/db");
                assert!(reason.contains("'user'"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_wipe_json_clears_nested_strings() {
        let mut value = serde_json::json!({"a": "secret", "b": ["x", 1, {"c": "y"}]});
        wipe_json(&mut value);
        assert_eq!(value, serde_json::json!({"a": "", "b": ["", 1, {"c": ""}]}));
    }

    #[test]
    fn test_payload_hint_covers_payload() {
        let mut data = sample().packages[0].kvs().to_vec();
        data.push(KV::new("quoted", "\"\\\u{1}").unwrap());
        let mut out = Vec::new();
        write_entries(&data, &mut out).unwrap();
        assert!(out.len() <= payload_hint(&data));
    }

    #[test]
    fn test_lock_skips_locked_chains() {
        let ctx = Context::background();
        let mut bundle = sample();
        bundle.packages[0].chain_mut().data.clear();
        bundle.packages[0].chain_mut().locked = Some(vec![7, 7]);
        lock(&ctx, &mut bundle, &Mirror).unwrap();
        assert_eq!(bundle.packages[0].secrets.as_ref().unwrap().locked, Some(vec![7, 7]));
    }

    #[test]
    fn test_lock_reports_package_on_failure() {
        let ctx = Context::background();
        let mut bundle = sample();
        match lock(&ctx, &mut bundle, &Failing) {
            Err(Error::Encrypt { package, reason }) => {
                assert_eq!(package, "infra/db");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_partial_lock_follows_annotation() {
        let ctx = Context::background();
        let mut bundle = sample();
        let keyring = Keyring::new().with("production", Arc::new(Mirror));
        partial_lock(&ctx, &mut bundle, &keyring, false).unwrap();
        assert!(!bundle.packages[0].is_locked());
        assert!(bundle.packages[1].is_locked());
    }

    #[test]
    fn test_partial_lock_unknown_alias() {
        let ctx = Context::background();
        let mut bundle = sample();
        let keyring = Keyring::new().with("staging", Arc::new(Mirror));
        match partial_lock(&ctx, &mut bundle, &keyring, false) {
            Err(Error::KeyNotFound { package, alias }) => {
                assert_eq!(package, "app/api");
                assert_eq!(alias, "production");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        partial_lock(&ctx, &mut bundle, &keyring, true).unwrap();
        assert!(!bundle.has_locked_packages());
    }

    #[test]
    fn test_unlock_tries_transformers_in_order() {
        let ctx = Context::background();
        let mut bundle = sample();
        lock(&ctx, &mut bundle, &Mirror).unwrap();
        let transformers: Vec<TransformerRef> = vec![Arc::new(Failing), Arc::new(Mirror)];
        unlock(&ctx, &mut bundle, &transformers, false).unwrap();
        assert!(!bundle.has_locked_packages());
    }

    #[test]
    fn test_unlock_undecryptable() {
        let ctx = Context::background();
        let mut bundle = sample();
        lock(&ctx, &mut bundle, &Mirror).unwrap();
        let transformers: Vec<TransformerRef> = vec![Arc::new(Failing)];

        assert!(matches!(
            unlock(&ctx, &mut bundle, &transformers, false),
            Err(Error::Decrypt { .. })
        ));
        unlock(&ctx, &mut bundle, &transformers, true).unwrap();
        assert!(bundle.packages.iter().all(Package::is_locked));
    }

    #[test]
    fn test_cancelled_context_aborts() {
        let ctx = Context::background();
        ctx.cancel();
        let mut bundle = sample();
        assert!(matches!(
            lock(&ctx, &mut bundle, &Mirror),
            Err(Error::Canceled)
        ));
        assert!(!bundle.has_locked_packages());
    }
}
