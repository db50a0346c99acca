//! Bundle data model.
//!
//! A two-level tree: a [`Bundle`] owns [`Package`]s, each package owns an
//! optional [`SecretChain`], and each chain owns its [`KV`] entries. The
//! types are plain structures; patching and encryption mutate them in place.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use zeroize::Zeroize;

use crate::core::packer;
use crate::core::types::{Annotations, Labels, MerkleRoot, PackageName, PackedValue, SecretKey};
use crate::error::{Error, Result};

/// Types carrying a label set.
pub trait HasLabels {
    fn labels(&self) -> &Labels;
    fn labels_mut(&mut self) -> &mut Labels;
}

/// Types carrying an annotation set.
pub trait HasAnnotations {
    fn annotations(&self) -> &Annotations;
    fn annotations_mut(&mut self) -> &mut Annotations;
}

macro_rules! impl_metadata {
    ($($ty:ty),+) => {
        $(
            impl HasLabels for $ty {
                fn labels(&self) -> &Labels {
                    &self.labels
                }
                fn labels_mut(&mut self) -> &mut Labels {
                    &mut self.labels
                }
            }

            impl HasAnnotations for $ty {
                fn annotations(&self) -> &Annotations {
                    &self.annotations
                }
                fn annotations_mut(&mut self) -> &mut Annotations {
                    &mut self.annotations
                }
            }
        )+
    };
}

impl_metadata!(Bundle, Package, SecretChain);

/// Root aggregate.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde_as(as = "Bytes")]
    #[serde(default)]
    pub merkle_tree_root: MerkleRoot,
    /// Opaque reference to the generation spec; never interpreted here.
    #[serde_as(as = "Option<Bytes>")]
    pub template: Option<Vec<u8>>,
}

impl Bundle {
    /// Empty bundle at the current format version.
    pub fn new() -> Self {
        Self {
            version: crate::core::constants::BUNDLE_FORMAT_VERSION,
            ..Self::default()
        }
    }

    /// Stable-sort packages by name.
    pub fn sort_packages(&mut self) {
        self.packages.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Case-insensitive package lookup.
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive mutable package lookup.
    pub fn package_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Exact-name lookup, creating an empty unlocked package when absent.
    pub fn package_or_insert(&mut self, name: &str) -> &mut Package {
        let index = match self.packages.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                self.packages.push(Package::new(name));
                self.packages.len() - 1
            }
        };
        &mut self.packages[index]
    }

    /// Check that package names are non-empty and unique.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the first offending package.
    pub fn ensure_unique_names(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for package in &self.packages {
            if package.name.is_empty() {
                return Err(Error::Validation("package name must not be empty".into()));
            }
            if !seen.insert(package.name.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate package name '{}'",
                    package.name
                )));
            }
        }
        Ok(())
    }

    /// Whether any package holds a locked chain.
    pub fn has_locked_packages(&self) -> bool {
        self.packages.iter().any(Package::is_locked)
    }
}

/// A named, path-addressed group of secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: PackageName,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub secrets: Option<SecretChain>,
}

impl Package {
    /// Empty package with an unlocked, empty chain.
    pub fn new(name: impl Into<PackageName>) -> Self {
        Self {
            name: name.into(),
            secrets: Some(SecretChain::default()),
            ..Self::default()
        }
    }

    /// Whether the package chain is encrypted.
    pub fn is_locked(&self) -> bool {
        self.secrets.as_ref().is_some_and(SecretChain::is_locked)
    }

    /// Unlocked KV entries; empty when the chain is absent or locked.
    pub fn kvs(&self) -> &[KV] {
        self.secrets.as_ref().map_or(&[], |s| s.data.as_slice())
    }

    /// Case-insensitive KV lookup.
    pub fn secret(&self, key: &str) -> Option<&KV> {
        self.secrets.as_ref().and_then(|s| s.get(key))
    }

    /// Mutable chain, created empty when absent.
    pub fn chain_mut(&mut self) -> &mut SecretChain {
        self.secrets.get_or_insert_with(SecretChain::default)
    }
}

/// Versioned, possibly encrypted container of KV entries.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretChain {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub data: Vec<KV>,
    #[serde_as(as = "Option<Bytes>")]
    pub locked: Option<Vec<u8>>,
    #[serde(default)]
    pub previous_version: Option<u32>,
    #[serde(default)]
    pub next_version: Option<u32>,
}

impl SecretChain {
    /// Whether the chain holds ciphertext instead of KV entries.
    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Case-insensitive KV lookup.
    pub fn get(&self, key: &str) -> Option<&KV> {
        self.data.iter().find(|kv| kv.key.eq_ignore_ascii_case(key))
    }

    /// Case-insensitive mutable KV lookup.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut KV> {
        self.data.iter_mut().find(|kv| kv.key.eq_ignore_ascii_case(key))
    }

    /// Whether a key is present (case-insensitive).
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a key (case-insensitive). Returns whether something was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.data.len();
        self.data.retain(|kv| !kv.key.eq_ignore_ascii_case(key));
        before != self.data.len()
    }

    /// Overwrite and drop the ciphertext, if any.
    pub fn wipe_locked(&mut self) {
        if let Some(mut locked) = self.locked.take() {
            locked.zeroize();
        }
    }
}

/// A single secret: key, type tag and packed value.
///
/// The packed value is overwritten when the entry is dropped.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KV {
    pub key: SecretKey,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde_as(as = "Bytes")]
    pub value: PackedValue,
}

impl KV {
    /// Pack `value` and tag it with its kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pack` if the value cannot be encoded.
    pub fn new<T: Serialize + ?Sized>(key: impl Into<SecretKey>, value: &T) -> Result<Self> {
        let packed = packer::pack(value)?;
        let kind = packer::type_tag_of(&packed)?;
        Ok(Self {
            key: key.into(),
            kind,
            value: packed,
        })
    }

    /// Pack a dynamic value, keeping its exact kind.
    pub fn from_value(key: impl Into<SecretKey>, value: &packer::Value) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            kind: packer::type_tag(value).to_string(),
            value: packer::pack_value(value)?,
        })
    }

    /// Pack a JSON value, preserving its natural kind.
    pub fn from_json(key: impl Into<SecretKey>, value: &serde_json::Value) -> Result<Self> {
        Self::from_value(key, &packer::json_to_value(value))
    }

    /// Pack a JSON value as the kind named by `kind`.
    ///
    /// Restores the kinds JSON flattens (`bytes`, `float32`, `float64`);
    /// see [`packer::json_to_tagged`].
    pub fn from_tagged_json(
        key: impl Into<SecretKey>,
        kind: &str,
        value: &serde_json::Value,
    ) -> Result<Self> {
        Self::from_value(key, &packer::json_to_tagged(value, kind)?)
    }

    /// Unpack into the natural JSON representation.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        packer::unpack_json(&self.value)
    }

    /// Textual rendering: strings as-is, everything else as JSON.
    pub fn to_text(&self) -> Result<String> {
        Ok(match self.to_json()? {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

impl std::fmt::Debug for KV {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KV")
            .field("key", &self.key)
            .field("type", &self.kind)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .finish()
    }
}

impl Drop for KV {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}
