//! Declarative bundle patches.
//!
//! A `BundlePatch` document is a list of rules. Each rule pairs a selector
//! with a set of mutations; [`apply`] runs every rule against every package
//! of a copy of the bundle.
//!
//! ```yaml
//! apiVersion: harp.elastic.co/v1
//! kind: BundlePatch
//! meta:
//!   name: rotate-db
//! spec:
//!   rules:
//!     - selector:
//!         matchPath:
//!           glob: "app/*/billing/**"
//!       package:
//!         labels:
//!           add:
//!             region: "{{ .Values.region }}"
//!         data:
//!           kv:
//!             update:
//!               DB_PASSWORD: "{{ .Values.password }}"
//! ```

mod executor;
mod spec;

pub use executor::{apply, compile_selector};
pub use spec::{
    BundlePatch, PatchKV, PatchMeta, PatchOperation, PatchPackage, PatchPackagePath, PatchRule,
    PatchSecret, PatchSelector, PatchSelectorMatch, PatchSpec,
};

pub(crate) use spec::checksum;
