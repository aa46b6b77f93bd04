use serde_json::{Map, Value};

use crate::domain::pod::expression::{Variables, render};
use crate::error::Result;

/// Deep-merges `overlay` into `base`.
///
/// Objects merge key by key. Arrays whose elements are all objects carrying a `name` merge
/// element-wise by that name (containers, volumes, env entries); any other array, and every
/// scalar, is replaced by the overlay.
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => merge_objects(base_map, overlay_map),
        (Value::Array(base_items), Value::Array(overlay_items)) if is_named_list(base_items) && is_named_list(overlay_items) => {
            for item in overlay_items {
                let name = item.get("name");
                match base_items.iter_mut().find(|existing| existing.get("name") == name) {
                    Some(existing) => merge(existing, item),
                    None => base_items.push(item.clone()),
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn merge_objects(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(key) {
            Some(existing) => merge(existing, value),
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn is_named_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| item.get("name").is_some_and(Value::is_string))
}

/// Merges a chain of templates in order; later templates win.
pub fn merge_all<'a>(templates: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut out = Value::Object(Map::new());
    for template in templates {
        merge(&mut out, template);
    }
    out
}

/// Substitutes `{{ ... }}` in every string of `value`, keys included.
pub fn substitute(value: &Value, variables: &Variables) -> Result<Value> {
    Ok(match value {
        Value::String(text) if text.contains("{{") => Value::String(render(text, variables)?),
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute(item, variables)).collect::<Result<_>>()?),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let key = if key.contains("{{") { render(key, variables)? } else { key.clone() };
                out.insert(key, substitute(item, variables)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}
