//! Domain types.

mod bundle;
mod oplog;

pub use bundle::{Bundle, HasAnnotations, HasLabels, Package, SecretChain, KV};
pub use oplog::{DiffItem, ItemType, OpLog, Operation};
