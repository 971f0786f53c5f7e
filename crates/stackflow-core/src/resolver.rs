//! Configuration resolver
//!
//! Merges layered configuration maps and resolves single properties whose
//! value may come from the node, the task inputs, the runtime properties or
//! a related instance.

use crate::context::{Endpoint, RelationshipInstance};
use crate::error::{OperationError, Result};
use crate::runtime::RuntimeProperties;
use crate::types::{kind_for_node_type, node_type};
use serde_json::{Map, Value};
use stackflow_cloud::ResourceKind;

/// Merge `overlay` into `base`
///
/// Maps merge key by key, recursively. Any other value in `overlay`
/// replaces the one in `base`, except `null` which leaves it untouched.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        if !value.is_null() {
                            base.insert(key, value);
                        }
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Deep-merge every present layer, lowest priority first
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = Option<&'a Value>>) -> Map<String, Value> {
    let mut merged = Value::Object(Map::new());
    for layer in layers.into_iter().flatten() {
        if layer.is_object() {
            deep_merge(&mut merged, layer.clone());
        }
    }
    match merged {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Whether a value counts as "not provided"
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// How one consumable property is resolved
#[derive(Debug, Clone, Copy)]
pub struct PropertyRule {
    pub key: &'static str,
    /// Kind of related instance that can provide the value
    pub kind: Option<ResourceKind>,
    /// Relationship type the related instance must be connected through
    pub relationship: Option<&'static str>,
    /// Inline and related values are concatenated instead of conflicting
    pub allow_multiple: bool,
    /// Several related instances are accepted and produce a list
    pub accepts_list: bool,
    /// Runtime key read from the related instance
    pub id_key: &'static str,
}

impl PropertyRule {
    pub const fn new(key: &'static str) -> Self {
        Self {
            key,
            kind: None,
            relationship: None,
            allow_multiple: false,
            accepts_list: false,
            id_key: "id",
        }
    }

    pub const fn related(key: &'static str, kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(key)
        }
    }

    pub const fn through(mut self, relationship: &'static str) -> Self {
        self.relationship = Some(relationship);
        self
    }

    pub const fn multiple(mut self) -> Self {
        self.allow_multiple = true;
        self.accepts_list = true;
        self
    }

    pub const fn list(mut self) -> Self {
        self.accepts_list = true;
        self
    }

    pub const fn reading(mut self, id_key: &'static str) -> Self {
        self.id_key = id_key;
        self
    }
}

/// Everything a property can be resolved from
#[derive(Debug, Clone, Copy)]
pub struct Sources<'a> {
    pub config: &'a Map<String, Value>,
    pub inputs: &'a Map<String, Value>,
    pub runtime: &'a RuntimeProperties,
    pub relationships: &'a [RelationshipInstance],
}

/// Whether `target` is an instance of `kind`
///
/// The runtime `type` written at create wins; otherwise the node type and
/// its hierarchy decide.
pub fn endpoint_is_kind(target: &Endpoint, kind: ResourceKind) -> bool {
    if let Some(type_name) = target.instance.runtime_properties.get_str(crate::runtime::TYPE) {
        return type_name == kind.resource_type();
    }
    if kind_for_node_type(&target.node.type_name) == Some(kind) {
        return true;
    }
    node_type(kind).is_some_and(|name| target.node.is_type(name))
}

/// Targets of `relationships` that are instances of `kind`, optionally
/// restricted to one relationship type
pub fn related_targets<'a>(
    relationships: &'a [RelationshipInstance],
    kind: ResourceKind,
    relationship: Option<&str>,
) -> Vec<&'a Endpoint> {
    relationships
        .iter()
        .filter(|rel| relationship.is_none_or(|type_name| rel.is_type(type_name)))
        .filter(|rel| endpoint_is_kind(&rel.target, kind))
        .map(|rel| &rel.target)
        .collect()
}

/// Targets connected through `relationship`, whatever their kind
pub fn targets_through<'a>(
    relationships: &'a [RelationshipInstance],
    relationship: &str,
) -> Vec<&'a Endpoint> {
    relationships
        .iter()
        .filter(|rel| rel.is_type(relationship))
        .map(|rel| &rel.target)
        .collect()
}

fn as_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Resolve one property according to `rule`
///
/// Inline priority is inputs, then runtime, then config. A related value
/// may only be combined with an inline one when the rule allows multiple
/// values.
pub fn resolve_property(rule: &PropertyRule, sources: &Sources<'_>) -> Result<Option<Value>> {
    let inline = [
        sources.inputs.get(rule.key),
        sources.runtime.get(rule.key),
        sources.config.get(rule.key),
    ]
    .into_iter()
    .flatten()
    .find(|value| !is_empty(value))
    .cloned();

    let related: Vec<Value> = match rule.kind {
        Some(kind) => related_targets(sources.relationships, kind, rule.relationship)
            .into_iter()
            .filter_map(|target| target.instance.runtime_properties.get(rule.id_key))
            .filter(|value| !is_empty(value))
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    if related.len() > 1 && !rule.accepts_list {
        return Err(OperationError::non_recoverable(format!(
            "{} related instances provide {}, but it accepts a single value",
            related.len(),
            rule.key
        )));
    }

    match (inline, related.is_empty()) {
        (None, true) => Ok(None),
        (Some(inline), true) => Ok(Some(inline)),
        (None, false) => {
            if rule.accepts_list {
                Ok(Some(Value::Array(related)))
            } else {
                Ok(related.into_iter().next())
            }
        }
        (Some(inline), false) => {
            if !rule.allow_multiple {
                return Err(OperationError::non_recoverable(format!(
                    "{} is set both inline ({}) and through a relationship ({}); use only one",
                    rule.key,
                    inline,
                    Value::Array(related)
                )));
            }
            let mut items = as_items(inline);
            items.extend(related);
            Ok(Some(Value::Array(items)))
        }
    }
}
