//! Patch document model.

use std::collections::BTreeMap;
use std::io::Read;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::core::constants::{API_VERSION, KIND_BUNDLE_PATCH};
use crate::error::{Error, Result};

/// A `BundlePatch` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePatch {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PatchMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PatchSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMeta {
    /// Also used as the annotation key marking touched packages.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSpec {
    #[serde(default)]
    pub rules: Vec<PatchRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub selector: PatchSelector,
    #[serde(default)]
    pub package: PatchPackage,
}

/// Exactly one member must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_path: Option<PatchSelectorMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jmes_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rego: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_secret: Option<PatchSelectorMatch>,
}

/// Exactly one member must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSelectorMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PatchPackagePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<PatchOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<PatchOperation>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PatchSecret>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPackagePath {
    pub template: String,
}

/// Map mutations for labels and annotations. Keys and values of `add` and
/// `update` are templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub update: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSecret {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<PatchOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<PatchOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv: Option<PatchKV>,
}

/// Secret mutations. String values are templates; other values are packed
/// as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchKV {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub update: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    /// Existing key → new key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replace_keys: BTreeMap<String, String>,
}

impl BundlePatch {
    /// Empty, valid patch named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND_BUNDLE_PATCH.to_string(),
            meta: Some(PatchMeta {
                name: name.into(),
                ..PatchMeta::default()
            }),
            spec: Some(PatchSpec::default()),
        }
    }

    /// Decode a YAML or JSON document and validate it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when the document does not decode or
    /// fails [`BundlePatch::validate`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let patch: Self = serde_yaml::from_reader(reader)
            .map_err(|e| Error::Validation(format!("unable to decode patch: {}", e)))?;
        patch.validate()?;
        Ok(patch)
    }

    /// [`from_reader`](Self::from_reader) over an in-memory document.
    pub fn from_yaml(document: &str) -> Result<Self> {
        Self::from_reader(document.as_bytes())
    }

    /// Check the document header.
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(Error::Validation(format!(
                "apiVersion should be '{}', got '{}'",
                API_VERSION, self.api_version
            )));
        }
        if self.kind != KIND_BUNDLE_PATCH {
            return Err(Error::Validation(format!(
                "kind should be '{}', got '{}'",
                KIND_BUNDLE_PATCH, self.kind
            )));
        }
        match &self.meta {
            None => return Err(Error::Validation("meta should be set".into())),
            Some(meta) if meta.name.trim().is_empty() => {
                return Err(Error::Validation("meta.name should be set".into()))
            }
            Some(_) => {}
        }
        if self.spec.is_none() {
            return Err(Error::Validation("spec should be set".into()));
        }
        Ok(())
    }

    /// Stable identifier: SHA-512 of the canonical binary encoding, base64
    /// URL-safe without padding.
    pub fn checksum(&self) -> Result<String> {
        checksum(self)
    }

    /// Patch name, or an empty string when `meta` is absent.
    pub fn name(&self) -> &str {
        self.meta.as_ref().map_or("", |m| m.name.as_str())
    }

    /// Rules in document order.
    pub fn rules(&self) -> &[PatchRule] {
        self.spec.as_ref().map_or(&[], |s| s.rules.as_slice())
    }
}

impl PatchRule {
    /// Identifier used in logs and errors: `id`, or the rule position.
    pub fn label(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("#{}", index))
    }
}

pub(crate) fn checksum<T: Serialize>(document: &T) -> Result<String> {
    let encoded = rmp_serde::to_vec_named(document)
        .map_err(|e| Error::Pack(format!("unable to encode document: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(Sha512::digest(&encoded)))
}
