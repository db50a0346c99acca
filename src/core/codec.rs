//! Bundle codec.
//!
//! Binary form: the bundle structure encoded as MessagePack with named
//! fields. Loading recomputes the Merkle root and refuses bundles whose
//! stored root does not match. Dumping sorts packages and refreshes the root
//! before encoding.
//!
//! JSON form: the same structure with every KV value unpacked to its
//! natural JSON type and byte fields rendered as base64. Loading uses each
//! entry's `type` tag to restore the kinds JSON flattens.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::core::domain::{Bundle, Package, SecretChain, KV};
use crate::core::merkle;
use crate::core::types::{Annotations, Labels};
use crate::error::{Error, Result};

/// Decode and verify a bundle from a reader.
///
/// # Errors
///
/// Returns `Error::Integrity` when the bytes do not decode or the stored
/// Merkle root differs from the recomputed one.
pub fn load<R: Read>(mut reader: R) -> Result<Bundle> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    from_bytes(&bytes)
}

/// Decode and verify a bundle from bytes.
pub fn from_bytes(bytes: &[u8]) -> Result<Bundle> {
    let bundle: Bundle = rmp_serde::from_slice(bytes)
        .map_err(|e| Error::Integrity(format!("unable to decode bundle: {}", e)))?;

    let computed = merkle::bundle_root(&bundle);
    if !bool::from(computed.as_slice().ct_eq(bundle.merkle_tree_root.as_slice())) {
        warn!(packages = bundle.packages.len(), "merkle root mismatch");
        return Err(Error::Integrity("merkle root mismatch".into()));
    }

    debug!(
        packages = bundle.packages.len(),
        bytes = bytes.len(),
        "bundle loaded"
    );
    Ok(bundle)
}

/// Sort packages, refresh the Merkle root and write the encoded bundle.
pub fn dump<W: Write>(bundle: &mut Bundle, mut writer: W) -> Result<()> {
    let bytes = to_bytes(bundle)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Sort packages, refresh the Merkle root and encode the bundle.
pub fn to_bytes(bundle: &mut Bundle) -> Result<Vec<u8>> {
    seal(bundle);
    let bytes = rmp_serde::to_vec_named(bundle)
        .map_err(|e| Error::Pack(format!("unable to encode bundle: {}", e)))?;
    debug!(
        packages = bundle.packages.len(),
        bytes = bytes.len(),
        "bundle encoded"
    );
    Ok(bytes)
}

/// Sort packages and assign the freshly computed Merkle root.
pub fn seal(bundle: &mut Bundle) {
    bundle.sort_packages();
    bundle.merkle_tree_root = merkle::bundle_root(bundle);
}

/// Unpacked view of a single package: key → natural JSON value.
///
/// Package lookup is case-insensitive.
///
/// # Errors
///
/// `Error::InvalidArgument` for an empty path or a locked package,
/// `Error::NotFound` when no package matches.
pub fn read(bundle: &Bundle, path: &str) -> Result<BTreeMap<String, serde_json::Value>> {
    if path.is_empty() {
        return Err(Error::InvalidArgument("package path must not be empty".into()));
    }
    let package = bundle
        .package(path)
        .ok_or_else(|| Error::NotFound(format!("package '{}'", path)))?;
    if package.is_locked() {
        return Err(Error::InvalidArgument(format!(
            "package '{}' is locked",
            package.name
        )));
    }

    package
        .kvs()
        .iter()
        .map(|kv| Ok((kv.key.clone(), unpack_kv(&package.name, kv)?)))
        .collect()
}

/// JSON projection of a bundle.
pub fn as_json(bundle: &Bundle) -> Result<serde_json::Value> {
    let projected = JsonBundle::project(bundle)?;
    serde_json::to_value(projected).map_err(|e| Error::Pack(e.to_string()))
}

/// Write the pretty-printed JSON projection.
pub fn dump_json<W: Write>(bundle: &Bundle, writer: W) -> Result<()> {
    let projected = JsonBundle::project(bundle)?;
    serde_json::to_writer_pretty(writer, &projected).map_err(|e| Error::Pack(e.to_string()))
}

/// Read a JSON projection, packing every value back into its envelope.
pub fn from_json<R: Read>(reader: R) -> Result<Bundle> {
    let projected: JsonBundle = serde_json::from_reader(reader)
        .map_err(|e| Error::InvalidArgument(format!("unable to decode JSON bundle: {}", e)))?;
    projected.into_bundle()
}

/// Read a JSON projection from an in-memory value.
pub fn from_json_value(value: serde_json::Value) -> Result<Bundle> {
    let projected: JsonBundle = serde_json::from_value(value)
        .map_err(|e| Error::InvalidArgument(format!("unable to decode JSON bundle: {}", e)))?;
    projected.into_bundle()
}

/// JSON projection of a single package, used by expression selectors.
pub fn package_json(package: &Package) -> Result<serde_json::Value> {
    let projected = JsonPackage::project(package)?;
    serde_json::to_value(projected).map_err(|e| Error::Pack(e.to_string()))
}

fn unpack_kv(package: &str, kv: &KV) -> Result<serde_json::Value> {
    kv.to_json()
        .map_err(|e| Error::Unpack(format!("{}#{}: {}", package, kv.key, e)))
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonBundle {
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    labels: Labels,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
    #[serde(default)]
    packages: Vec<JsonPackage>,
    #[serde_as(as = "Base64")]
    #[serde(default)]
    merkle_tree_root: Vec<u8>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonPackage {
    name: String,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    labels: Labels,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secrets: Option<JsonSecretChain>,
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSecretChain {
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    labels: Labels,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    annotations: Annotations,
    #[serde(default)]
    data: Vec<JsonKV>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    locked: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_version: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonKV {
    key: String,
    #[serde(rename = "type", default)]
    kind: String,
    value: serde_json::Value,
}

impl JsonBundle {
    fn project(bundle: &Bundle) -> Result<Self> {
        Ok(Self {
            version: bundle.version,
            labels: bundle.labels.clone(),
            annotations: bundle.annotations.clone(),
            packages: bundle
                .packages
                .iter()
                .map(JsonPackage::project)
                .collect::<Result<_>>()?,
            merkle_tree_root: bundle.merkle_tree_root.clone(),
            template: bundle.template.clone(),
        })
    }

    fn into_bundle(self) -> Result<Bundle> {
        Ok(Bundle {
            version: self.version,
            labels: self.labels,
            annotations: self.annotations,
            packages: self
                .packages
                .into_iter()
                .map(JsonPackage::into_package)
                .collect::<Result<_>>()?,
            merkle_tree_root: self.merkle_tree_root,
            template: self.template,
        })
    }
}

impl JsonPackage {
    fn project(package: &Package) -> Result<Self> {
        let secrets = match &package.secrets {
            Some(chain) => Some(JsonSecretChain {
                version: chain.version,
                labels: chain.labels.clone(),
                annotations: chain.annotations.clone(),
                data: chain
                    .data
                    .iter()
                    .map(|kv| {
                        Ok(JsonKV {
                            key: kv.key.clone(),
                            kind: kv.kind.clone(),
                            value: unpack_kv(&package.name, kv)?,
                        })
                    })
                    .collect::<Result<_>>()?,
                locked: chain.locked.clone(),
                previous_version: chain.previous_version,
                next_version: chain.next_version,
            }),
            None => None,
        };

        Ok(Self {
            name: package.name.clone(),
            labels: package.labels.clone(),
            annotations: package.annotations.clone(),
            secrets,
        })
    }

    fn into_package(self) -> Result<Package> {
        let secrets = match self.secrets {
            Some(chain) => Some(SecretChain {
                version: chain.version,
                labels: chain.labels,
                annotations: chain.annotations,
                data: chain
                    .data
                    .iter()
                    .map(|kv| KV::from_tagged_json(kv.key.as_str(), &kv.kind, &kv.value))
                    .collect::<Result<_>>()?,
                locked: chain.locked,
                previous_version: chain.previous_version,
                next_version: chain.next_version,
            }),
            None => None,
        };

        Ok(Package {
            name: self.name,
            labels: self.labels,
            annotations: self.annotations,
            secrets,
        })
    }
}
