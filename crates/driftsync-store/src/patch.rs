//! JSON merge patch (RFC 7386).
//!
//! The apply cache sends the smallest merge patch that turns the live
//! object into the desired one; stores apply it with [`apply`].

use serde_json::{Map, Value};

/// Apply a merge patch to `target` in place.
pub fn apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Compute the merge patch that turns `original` into `modified`.
///
/// Returns an empty object when the two are equal. Arrays are replaced
/// wholesale, as merge patch has no array operations.
pub fn diff(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, orig_value) in orig {
                match modi.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new_value) if new_value != orig_value => {
                        if orig_value.is_object() && new_value.is_object() {
                            patch.insert(key.clone(), diff(orig_value, new_value));
                        } else {
                            patch.insert(key.clone(), new_value.clone());
                        }
                    }
                    Some(_) => {}
                }
            }
            for (key, new_value) in modi {
                if !orig.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            Value::Object(patch)
        }
        _ if original == modified => Value::Object(Map::new()),
        _ => modified.clone(),
    }
}

/// True if the patch would change nothing.
pub fn is_empty(patch: &Value) -> bool {
    matches!(patch, Value::Object(m) if m.is_empty())
}
