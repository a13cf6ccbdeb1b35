//! Deep merge of JSON documents shaped like a `ClusterSpec`.
//!
//! * objects merge key by key, source wins on scalar conflicts
//! * arrays whose elements are all objects carrying a string `name` merge
//!   element-wise by that name (tiers, availability zones)
//! * any other array appends the source elements missing from the destination
//! * a source `null` overrides, so merge patch deletions survive fusing

use crate::errors::{MergeError, ModelError};
use crate::types::ClusterSpec;
use serde_json::{Map, Value};

/// Merges `src` into `dst` in place.
pub fn merge(dst: &mut Value, src: &Value) -> Result<(), MergeError> {
    merge_at(dst, src, "$")
}

/// Fuses merge patches left to right: later patches win on conflicts and
/// extend arrays.
pub fn fuse_patches<'a, I>(patches: I) -> Result<Value, MergeError>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut fused = Value::Object(Map::new());
    for patch in patches {
        merge(&mut fused, patch)?;
    }
    Ok(fused)
}

/// Typed wrapper around [`merge`].
pub fn merge_specs(dst: &ClusterSpec, src: &ClusterSpec) -> Result<ClusterSpec, ModelError> {
    let mut merged = dst.to_value()?;
    merge(&mut merged, &src.to_value()?)?;
    ClusterSpec::from_value(merged)
}

fn merge_at(dst: &mut Value, src: &Value, path: &str) -> Result<(), MergeError> {
    if src.is_null() || dst.is_null() {
        *dst = src.clone();
        return Ok(());
    }

    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dst_map.get_mut(key) {
                    Some(dst_value) => merge_at(dst_value, src_value, &format!("{path}.{key}"))?,
                    None => {
                        dst_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
            Ok(())
        }
        (Value::Array(dst_items), Value::Array(src_items)) => {
            if is_named_list(dst_items) && is_named_list(src_items) {
                merge_named(dst_items, src_items, path)
            } else {
                for item in src_items {
                    if !dst_items.contains(item) {
                        dst_items.push(item.clone());
                    }
                }
                Ok(())
            }
        }
        (dst, src) if is_scalar(dst) && kind(dst) == kind(src) => {
            *dst = src.clone();
            Ok(())
        }
        (dst, src) => Err(MergeError::TypeMismatch {
            path: path.to_string(),
            dst: kind(dst),
            src: kind(src),
        }),
    }
}

fn merge_named(dst: &mut Vec<Value>, src: &[Value], path: &str) -> Result<(), MergeError> {
    for item in src {
        let name = item.get("name");
        match dst.iter_mut().find(|existing| existing.get("name") == name) {
            Some(existing) => {
                let label = name.and_then(Value::as_str).unwrap_or_default();
                merge_at(existing, item, &format!("{path}[{label}]"))?;
            }
            None => dst.push(item.clone()),
        }
    }
    Ok(())
}

fn is_named_list(items: &[Value]) -> bool {
    items
        .iter()
        .all(|item| item.get("name").is_some_and(Value::is_string))
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContainerRuntime, Tier};
    use serde_json::json;

    #[test]
    fn test_scalars_override_and_maps_union() {
        let mut dst = json!({"region": "va7", "tags": {"a": "1", "b": "2"}});
        merge(&mut dst, &json!({"region": "or1", "tags": {"b": "3", "c": "4"}})).unwrap();
        assert_eq!(
            dst,
            json!({"region": "or1", "tags": {"a": "1", "b": "3", "c": "4"}})
        );
    }

    #[test]
    fn test_tiers_merge_by_name() {
        let mut dst = json!({"tiers": [
            {"name": "system", "instanceType": "m5.large", "taints": ["a"]},
            {"name": "worker", "minCapacity": 1}
        ]});
        let src = json!({"tiers": [
            {"name": "worker", "containerRuntime": "cri-o", "minCapacity": 3},
            {"name": "system", "taints": ["a", "b"]},
            {"name": "gpu"}
        ]});
        merge(&mut dst, &src).unwrap();
        assert_eq!(
            dst,
            json!({"tiers": [
                {"name": "system", "instanceType": "m5.large", "taints": ["a", "b"]},
                {"name": "worker", "minCapacity": 3, "containerRuntime": "cri-o"},
                {"name": "gpu"}
            ]})
        );
    }

    #[test]
    fn test_plain_arrays_append_and_dedupe() {
        let mut dst = json!({"offering": ["caas", "paas"]});
        merge(&mut dst, &json!({"offering": ["paas", "edge"]})).unwrap();
        assert_eq!(dst, json!({"offering": ["caas", "paas", "edge"]}));
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let mut dst = json!({"tiers": []});
        let err = merge(&mut dst, &json!({"tiers": "worker"})).unwrap_err();
        assert_eq!(
            err,
            MergeError::TypeMismatch {
                path: "$.tiers".into(),
                dst: "array",
                src: "string"
            }
        );
        assert!(merge(&mut json!({"a": 1}), &json!({"a": "1"})).is_err());
    }

    #[test]
    fn test_null_survives_fusing() {
        let fused = fuse_patches(&[json!({"extra": {"oidcIssuer": "x"}}), json!({"extra": null})])
            .unwrap();
        assert_eq!(fused, json!({"extra": null}));
    }

    #[test]
    fn test_fuse_is_associative_on_disjoint_tiers() {
        let a = json!({"tiers": [{"name": "a"}]});
        let b = json!({"tiers": [{"name": "b"}]});
        let c = json!({"tiers": [{"name": "c"}]});

        let left = fuse_patches(&[fuse_patches(&[a.clone(), b.clone()]).unwrap(), c.clone()]).unwrap();
        let right = fuse_patches(&[a, fuse_patches(&[b, c]).unwrap()]).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_merge_specs_fills_container_runtime() {
        let pool = ClusterSpec {
            tiers: vec![Tier {
                name: "worker".into(),
                instance_type: "m5.xlarge".into(),
                max_capacity: 10,
                ..Default::default()
            }],
            ..Default::default()
        };
        let node_config = ClusterSpec {
            tiers: vec![Tier {
                name: "worker".into(),
                container_runtime: Some(ContainerRuntime::Docker),
                ..Default::default()
            }],
            ..Default::default()
        };
        let merged = merge_specs(&pool, &node_config).unwrap();
        assert_eq!(merged.tiers.len(), 1);
        assert_eq!(merged.tiers[0].instance_type, "m5.xlarge");
        assert_eq!(merged.tiers[0].max_capacity, 10);
        assert_eq!(merged.tiers[0].container_runtime, Some(ContainerRuntime::Docker));
    }
}
