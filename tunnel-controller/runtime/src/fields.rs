//! Comparison of desired objects against what the controller last applied.
//!
//! The API server records the fields each manager owns in
//! `metadata.managedFields` using the `FieldsV1` encoding: `f:<name>` selects a
//! map field, `k:<json>` a list element by its keys, `v:<json>` a set element
//! by value and `i:<n>` a list element by index. An empty set marks a leaf.
//! Projecting the live object onto the controller's own field set and
//! comparing the result with the desired object tells whether an apply would
//! change anything, regardless of fields defaulted or written by others.

use crate::k8s::{ObjectMeta, Resource};
use serde::Serialize;
use serde_json::{Map, Value};

const APPLY: &str = "Apply";

/// Returns true if applying `desired` as `manager` would not change `live`.
pub(crate) fn is_applied<K>(live: &K, desired: &K, manager: &str) -> serde_json::Result<bool>
where
    K: Resource + Serialize,
{
    let Some(owned) = applied_fields(live.meta(), manager) else {
        return Ok(false);
    };

    let live = serde_json::to_value(live)?;
    Ok(project(&live, owned) == desired_fields(desired)?)
}

/// The field set of `manager`'s server-side applies.
pub(crate) fn applied_fields<'m>(meta: &'m ObjectMeta, manager: &str) -> Option<&'m Value> {
    meta.managed_fields
        .iter()
        .flatten()
        .find(|entry| {
            entry.manager.as_deref() == Some(manager) && entry.operation.as_deref() == Some(APPLY)
        })
        .and_then(|entry| entry.fields_v1.as_ref())
        .map(|fields| &fields.0)
}

/// Keeps only the parts of `value` selected by `fields`.
pub(crate) fn project(value: &Value, fields: &Value) -> Value {
    let fields = match fields.as_object() {
        Some(fields) if !fields.is_empty() => fields,
        _ => return value.clone(),
    };

    match value {
        Value::Object(obj) => {
            let mut out = Map::new();
            for (key, sub) in fields {
                let Some(name) = key.strip_prefix("f:") else {
                    continue;
                };
                if let Some(v) = obj.get(name) {
                    out.insert(name.to_string(), project(v, sub));
                }
            }
            Value::Object(out)
        }

        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    fields
                        .iter()
                        .find(|(key, _)| selects(key, i, item))
                        .map(|(_, sub)| project(item, sub))
                })
                .collect(),
        ),

        _ => value.clone(),
    }
}

fn selects(key: &str, index: usize, item: &Value) -> bool {
    if let Some(keys) = key.strip_prefix("k:") {
        return match serde_json::from_str::<Value>(keys) {
            Ok(Value::Object(keys)) => keys.iter().all(|(k, v)| item.get(k) == Some(v)),
            _ => false,
        };
    }

    if let Some(v) = key.strip_prefix("v:") {
        return serde_json::from_str::<Value>(v).is_ok_and(|v| v == *item);
    }

    if let Some(i) = key.strip_prefix("i:") {
        return i.parse::<usize>() == Ok(index);
    }

    false
}

/// The desired object as the API server would record it in a field set:
/// without identity, status or unset fields.
pub(crate) fn desired_fields<K: Serialize>(desired: &K) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(desired)?;
    if let Value::Object(obj) = &mut value {
        obj.remove("apiVersion");
        obj.remove("kind");
        obj.remove("status");
        if let Some(Value::Object(meta)) = obj.get_mut("metadata") {
            meta.remove("name");
            meta.remove("namespace");
        }
    }
    prune_nulls(&mut value);
    Ok(value)
}

fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            obj.retain(|_, v| !v.is_null());
            obj.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}
