//! Patch execution.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::core::constants::ANNOTATION_PATCHED;
use crate::core::domain::{Bundle, HasAnnotations, HasLabels, Package, KV};
use crate::core::selector::{
    BoxedSelector, Expressions, JmesPath, MatchPath, MatchSecret, Matcher, Selector,
};
use crate::core::template::{self, Template};
use crate::core::validation::{validate_package_name, validate_secret_key};
use crate::error::{Error, Result};

use super::spec::{BundlePatch, PatchKV, PatchOperation, PatchRule, PatchSelector, PatchSelectorMatch};

#[cfg(feature = "rego")]
use crate::core::selector::Rego;

/// Apply `patch` to a copy of `bundle`, rendering templates against
/// `values`.
///
/// Selectors and path templates are compiled before any package is
/// touched. The input bundle is never modified; on error it is the only
/// surviving state.
///
/// # Errors
///
/// Returns `Error::Validation` for an invalid header, a selector with zero
/// or several kinds, an invalid resulting name or key, a patched locked
/// secret set, or duplicate names after renames. Selector evaluation,
/// template and pack failures are returned as their own kinds.
pub fn apply(patch: &BundlePatch, bundle: &Bundle, values: &Value) -> Result<Bundle> {
    patch.validate()?;
    let name = patch.name();

    let rules = patch
        .rules()
        .iter()
        .enumerate()
        .map(|(index, rule)| CompiledRule::compile(index, rule))
        .collect::<Result<Vec<_>>>()?;

    let mut output = bundle.clone();
    let mut keep = vec![true; output.packages.len()];
    let mut touched = 0usize;

    for (index, package) in output.packages.iter_mut().enumerate() {
        for rule in &rules {
            if !rule.selector.evaluate(package)? {
                continue;
            }
            debug!(patch = %name, rule = %rule.label, package = %package.name, "rule matched");

            if rule.spec.package.remove {
                keep[index] = false;
                continue;
            }
            rule.execute(package, values)?;
            package
                .annotations
                .insert(ANNOTATION_PATCHED.to_string(), "true".to_string());
            package.annotations.insert(name.to_string(), "true".to_string());
            touched += 1;
        }
    }

    let mut flags = keep.into_iter();
    output.packages.retain(|_| flags.next().unwrap_or(true));
    output.ensure_unique_names()?;

    info!(
        patch = %name,
        rules = rules.len(),
        mutations = touched,
        packages = output.packages.len(),
        "patch applied"
    );
    Ok(output)
}

/// Build the selector described by a patch rule.
///
/// # Errors
///
/// Returns `Error::Validation` unless exactly one selector kind is set, and
/// `Error::SelectorCompile` when it does not compile.
pub fn compile_selector(selector: &PatchSelector) -> Result<BoxedSelector> {
    let kinds = [
        selector.match_path.is_some(),
        selector.jmes_path.is_some(),
        selector.rego.is_some(),
        selector.cel.is_some(),
        selector.match_secret.is_some(),
    ];
    if kinds.iter().filter(|set| **set).count() != 1 {
        return Err(Error::Validation(
            "selector must set exactly one of matchPath, jmesPath, rego, cel, matchSecret".into(),
        ));
    }

    if let Some(m) = &selector.match_path {
        return Ok(Box::new(MatchPath::new(compile_matcher(m)?)));
    }
    if let Some(m) = &selector.match_secret {
        return Ok(Box::new(MatchSecret::new(compile_matcher(m)?)));
    }
    if let Some(query) = &selector.jmes_path {
        return Ok(Box::new(JmesPath::new(query)?));
    }
    if let Some(expressions) = &selector.cel {
        return Ok(Box::new(Expressions::new(expressions)?));
    }
    match &selector.rego {
        #[cfg(feature = "rego")]
        Some(source) => Ok(Box::new(Rego::new(source)?)),
        #[cfg(not(feature = "rego"))]
        Some(_) => Err(Error::Validation(
            "rego selectors require the 'rego' feature".into(),
        )),
        None => Err(Error::Validation("empty selector".into())),
    }
}

fn compile_matcher(m: &PatchSelectorMatch) -> Result<Matcher> {
    match (&m.strict, &m.regex, &m.glob) {
        (Some(value), None, None) => Ok(Matcher::strict(value.as_str())),
        (None, Some(pattern), None) => Matcher::regex(pattern),
        (None, None, Some(pattern)) => Matcher::glob(pattern),
        _ => Err(Error::Validation(
            "matcher must set exactly one of strict, regex, glob".into(),
        )),
    }
}

struct CompiledRule<'p> {
    label: String,
    spec: &'p PatchRule,
    selector: BoxedSelector,
    path: Option<Template>,
}

impl<'p> CompiledRule<'p> {
    fn compile(index: usize, spec: &'p PatchRule) -> Result<Self> {
        let path = spec
            .package
            .path
            .as_ref()
            .map(|p| Template::parse(&p.template))
            .transpose()?;
        Ok(Self {
            label: spec.label(index),
            spec,
            selector: compile_selector(&spec.selector)?,
            path,
        })
    }

    fn execute(&self, package: &mut Package, values: &Value) -> Result<()> {
        let ops = &self.spec.package;

        if let Some(path) = &self.path {
            let renamed = path.render(&template::context(values, Some(&package.name)))?;
            validate_package_name(&renamed)?;
            if renamed != package.name {
                debug!(from = %package.name, to = %renamed, "package renamed");
                package.name = renamed;
            }
        }

        let data = template::context(values, None);
        if let Some(op) = &ops.annotations {
            patch_map(package.annotations_mut(), op, &data)?;
        }
        if let Some(op) = &ops.labels {
            patch_map(package.labels_mut(), op, &data)?;
        }

        let Some(secret) = &ops.data else {
            return Ok(());
        };
        if let Some(op) = &secret.annotations {
            patch_map(package.chain_mut().annotations_mut(), op, &data)?;
        }
        if let Some(op) = &secret.labels {
            patch_map(package.chain_mut().labels_mut(), op, &data)?;
        }
        if let Some(op) = &secret.kv {
            patch_kv(package, op, &data)?;
        }
        Ok(())
    }
}

/// `remove`, then `add` (absent keys only), then `update` (upsert).
fn patch_map(map: &mut BTreeMap<String, String>, op: &PatchOperation, data: &Value) -> Result<()> {
    for key in &op.remove {
        map.remove(key);
    }
    for (key, value) in &op.add {
        let key = template::render(key, data)?;
        if !map.contains_key(&key) {
            map.insert(key, template::render(value, data)?);
        }
    }
    for (key, value) in &op.update {
        map.insert(template::render(key, data)?, template::render(value, data)?);
    }
    Ok(())
}

fn patch_kv(package: &mut Package, op: &PatchKV, data: &Value) -> Result<()> {
    if package.is_locked() {
        return Err(Error::Validation(format!(
            "package '{}' is locked, its secrets cannot be patched",
            package.name
        )));
    }
    let name = package.name.clone();
    let chain = package.chain_mut();

    for key in &op.remove {
        chain.remove(key);
    }
    for (key, value) in &op.add {
        if chain.contains_key(key) {
            continue;
        }
        validate_secret_key(&name, key)?;
        chain.data.push(KV::from_json(key.as_str(), &render_value(value, data)?)?);
    }
    for (key, value) in &op.update {
        if let Some(existing) = chain.get_mut(key) {
            let rendered = render_value(value, data)?;
            *existing = KV::from_json(existing.key.clone(), &rendered)?;
        }
    }
    for (from, to) in &op.replace_keys {
        if !chain.contains_key(from) {
            continue;
        }
        validate_secret_key(&name, to)?;
        if !from.eq_ignore_ascii_case(to) && chain.contains_key(to) {
            return Err(Error::Validation(format!(
                "cannot rename '{}#{}' to '{}': key already exists",
                name, from, to
            )));
        }
        if let Some(kv) = chain.get_mut(from) {
            kv.key = to.clone();
        }
    }
    Ok(())
}

/// Strings are templates; other JSON values are kept as they are.
fn render_value(value: &Value, data: &Value) -> Result<Value> {
    match value {
        Value::String(source) => template::render(source, data).map(Value::String),
        other => Ok(other.clone()),
    }
}
