//! Stable content hash used as a change detection token.
//!
//! The hash covers the whole object except the fields the API server or the
//! controllers themselves rewrite on every update, so that writing the hash
//! back into the object does not change it.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 of `object` with `metadata.managedFields`,
/// `metadata.resourceVersion` and `annotation` removed.
pub fn fingerprint(object: &Value, annotation: &str) -> String {
    let mut object = object.clone();
    strip_volatile(&mut object, annotation);

    let mut canonical = String::new();
    write_canonical(&object, &mut canonical);

    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn strip_volatile(object: &mut Value, annotation: &str) {
    let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    metadata.remove("managedFields");
    metadata.remove("resourceVersion");

    let now_empty = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
        Some(annotations) => {
            annotations.remove(annotation);
            annotations.is_empty()
        }
        None => false,
    };
    // An object whose only annotation was the hash must hash like one that never had it.
    if now_empty {
        metadata.remove("annotations");
    }
}

/// Writes JSON with object keys sorted, independent of how the map was built.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
