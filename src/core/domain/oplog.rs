//! OpLog type.
//!
//! Ordered record of the structural changes between two bundles.

use serde::{Deserialize, Serialize};

/// Kind of change recorded by a [`DiffItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Add,
    Remove,
    Replace,
    /// Anything else found in a deserialized log.
    Unknown(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "replace" => Self::Replace,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        value.as_str().to_string()
    }
}

/// Object a [`DiffItem`] refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    Package,
    Secret,
    Unknown(String),
}

impl ItemType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Package => "package",
            Self::Secret => "secret",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "package" => Self::Package,
            "secret" => Self::Secret,
            _ => Self::Unknown(value),
        }
    }
}

impl From<ItemType> for String {
    fn from(value: ItemType) -> Self {
        value.as_str().to_string()
    }
}

/// A single entry of an [`OpLog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffItem {
    #[serde(rename = "op")]
    operation: Operation,
    #[serde(rename = "type")]
    item_type: ItemType,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl DiffItem {
    /// Create a new item.
    pub fn new(
        operation: Operation,
        item_type: ItemType,
        path: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            operation,
            item_type,
            path: path.into(),
            value,
        }
    }

    /// Package-level item.
    pub fn package(operation: Operation, name: &str) -> Self {
        Self::new(operation, ItemType::Package, name, None)
    }

    /// Secret-level item with a `<pkg>#<key>` path.
    pub fn secret(operation: Operation, package: &str, key: &str, value: Option<String>) -> Self {
        Self::new(
            operation,
            ItemType::Secret,
            format!("{}#{}", package, key),
            value,
        )
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn item_type(&self) -> &ItemType {
        &self.item_type
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Unpacked value; absent for removals.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Split a secret path into package name and key.
    pub fn secret_path(&self) -> Option<(&str, &str)> {
        self.path.split_once('#')
    }
}

impl std::fmt::Display for DiffItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {}",
            self.operation.as_str(),
            self.item_type.as_str(),
            self.path
        )
    }
}

/// Ordered sequence of diff items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpLog {
    items: Vec<DiffItem>,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DiffItem) {
        self.items.push(item);
    }

    /// All items, in emission order.
    pub fn items(&self) -> &[DiffItem] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiffItem> {
        self.items.iter()
    }

    /// Only additions.
    pub fn added(&self) -> Vec<&DiffItem> {
        self.filter(&Operation::Add)
    }

    /// Only removals.
    pub fn removed(&self) -> Vec<&DiffItem> {
        self.filter(&Operation::Remove)
    }

    /// Only replacements.
    pub fn replaced(&self) -> Vec<&DiffItem> {
        self.filter(&Operation::Replace)
    }

    fn filter(&self, operation: &Operation) -> Vec<&DiffItem> {
        self.items
            .iter()
            .filter(|i| &i.operation == operation)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<DiffItem>> for OpLog {
    fn from(items: Vec<DiffItem>) -> Self {
        Self { items }
    }
}

impl IntoIterator for OpLog {
    type Item = DiffItem;
    type IntoIter = std::vec::IntoIter<DiffItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a OpLog {
    type Item = &'a DiffItem;
    type IntoIter = std::slice::Iter<'a, DiffItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
