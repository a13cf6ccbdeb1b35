//! Label selector evaluation and the child object to `ClusterSync` mapping.

use crate::crd::{ClusterSync, WatchedResource};
use crate::errors::AgentError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::ObjectRef;
use std::collections::BTreeMap;
use std::sync::Arc;

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, AgentError> {
    let value = labels.get(&requirement.key).map(String::as_str);
    let values = requirement.values.as_deref().unwrap_or_default();
    let in_values = value.is_some_and(|v| values.iter().any(|req| req == v));

    match requirement.operator.as_str() {
        "In" => Ok(in_values),
        "NotIn" => Ok(!in_values),
        "Exists" => Ok(value.is_some()),
        "DoesNotExist" => Ok(value.is_none()),
        other => Err(AgentError::InvalidSelector(format!(
            "unknown operator {other} for key {}",
            requirement.key
        ))),
    }
}

/// Kubernetes selector semantics: every term must hold, an empty selector
/// matches everything.
pub fn matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool, AgentError> {
    if let Some(match_labels) = &selector.match_labels {
        let all = match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value));
        if !all {
            return Ok(false);
        }
    }
    for requirement in selector.match_expressions.iter().flatten() {
        if !requirement_matches(requirement, labels)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Renders `selector` in the `labelSelector` query syntax of the API server.
pub fn to_query(selector: &LabelSelector) -> Result<String, AgentError> {
    let mut terms = Vec::new();
    for (key, value) in selector.match_labels.iter().flatten() {
        terms.push(format!("{key}={value}"));
    }
    for requirement in selector.match_expressions.iter().flatten() {
        let key = &requirement.key;
        let values = requirement.values.as_deref().unwrap_or_default().join(",");
        let term = match requirement.operator.as_str() {
            "In" => format!("{key} in ({values})"),
            "NotIn" => format!("{key} notin ({values})"),
            "Exists" => key.clone(),
            "DoesNotExist" => format!("!{key}"),
            other => {
                return Err(AgentError::InvalidSelector(format!(
                    "unknown operator {other} for key {key}"
                )));
            }
        };
        terms.push(term);
    }
    Ok(terms.join(","))
}

/// Whether `watched` selects the object `name` with `labels` of the given kind.
pub fn selects(
    watched: &WatchedResource,
    api_version: &str,
    kind: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> bool {
    if watched.api_version != api_version || watched.kind != kind {
        return false;
    }
    if let Some(wanted) = &watched.name {
        return wanted == name;
    }
    match &watched.label_selector {
        Some(selector) => matches(selector, labels).unwrap_or_else(|e| {
            tracing::warn!(error = %e, kind, "Ignoring invalid label selector");
            false
        }),
        None => true,
    }
}

/// Every `ClusterSync` in the child's namespace that watches it.
pub fn affected_syncs(
    syncs: &[Arc<ClusterSync>],
    child: &DynamicObject,
    api_version: &str,
    kind: &str,
) -> Vec<ObjectRef<ClusterSync>> {
    let namespace = child.namespace();
    let name = child.name_any();
    let labels = child.labels();

    syncs
        .iter()
        .filter(|sync| sync.namespace() == namespace)
        .filter(|sync| {
            sync.spec
                .watched_resources
                .iter()
                .any(|watched| selects(watched, api_version, kind, &name, labels))
        })
        .map(|sync| ObjectRef::from_obj(sync.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::object;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn selector(value: serde_json::Value) -> LabelSelector {
        serde_json::from_value(value).unwrap()
    }

    fn sync(name: &str, namespace: &str, watched: serde_json::Value) -> Arc<ClusterSync> {
        Arc::new(
            serde_json::from_value(json!({
                "apiVersion": "registry.ethos.adobe.com/v1",
                "kind": "ClusterSync",
                "metadata": {"name": name, "namespace": namespace},
                "spec": {"clusterName": "cluster01-prod-useast1", "watchedResources": watched}
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_match_labels_and_expressions() {
        let s = selector(json!({
            "matchLabels": {"tier": "private"},
            "matchExpressions": [
                {"key": "zone", "operator": "In", "values": ["a", "b"]},
                {"key": "legacy", "operator": "DoesNotExist"}
            ]
        }));

        assert!(matches(&s, &labels(&[("tier", "private"), ("zone", "a")])).unwrap());
        assert!(!matches(&s, &labels(&[("tier", "private"), ("zone", "c")])).unwrap());
        assert!(!matches(&s, &labels(&[("tier", "public"), ("zone", "a")])).unwrap());
        assert!(
            !matches(
                &s,
                &labels(&[("tier", "private"), ("zone", "a"), ("legacy", "true")])
            )
            .unwrap()
        );
    }

    #[test]
    fn test_empty_selector_matches_all() {
        assert!(matches(&LabelSelector::default(), &BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_not_in_and_exists() {
        let s = selector(json!({"matchExpressions": [
            {"key": "env", "operator": "NotIn", "values": ["dev"]},
            {"key": "team", "operator": "Exists"}
        ]}));
        assert!(matches(&s, &labels(&[("team", "x")])).unwrap());
        assert!(!matches(&s, &labels(&[("team", "x"), ("env", "dev")])).unwrap());
        assert!(!matches(&s, &labels(&[("env", "prod")])).unwrap());
    }

    #[test]
    fn test_unknown_operator() {
        let s = selector(json!({"matchExpressions": [{"key": "a", "operator": "Gt", "values": ["1"]}]}));
        assert!(matches(&s, &BTreeMap::new()).is_err());
        assert!(to_query(&s).is_err());
    }

    #[test]
    fn test_to_query() {
        let s = selector(json!({
            "matchLabels": {"tier": "private"},
            "matchExpressions": [
                {"key": "zone", "operator": "In", "values": ["a", "b"]},
                {"key": "env", "operator": "NotIn", "values": ["dev"]},
                {"key": "team", "operator": "Exists"},
                {"key": "legacy", "operator": "DoesNotExist"}
            ]
        }));
        assert_eq!(
            to_query(&s).unwrap(),
            "tier=private,zone in (a,b),env notin (dev),team,!legacy"
        );
    }

    #[test]
    fn test_affected_syncs() {
        let by_name = sync(
            "by-name",
            "cluster-registry",
            json!([{"apiVersion": "ec2.services.k8s.aws/v1alpha1", "kind": "VPC", "name": "main"}]),
        );
        let by_label = sync(
            "by-label",
            "cluster-registry",
            json!([{
                "apiVersion": "ec2.services.k8s.aws/v1alpha1",
                "kind": "VPC",
                "labelSelector": {"matchLabels": {"owner": "registry"}}
            }]),
        );
        let other_ns = sync(
            "other-ns",
            "default",
            json!([{"apiVersion": "ec2.services.k8s.aws/v1alpha1", "kind": "VPC"}]),
        );
        let other_kind = sync(
            "other-kind",
            "cluster-registry",
            json!([{"apiVersion": "ec2.services.k8s.aws/v1alpha1", "kind": "Subnet"}]),
        );
        let syncs = vec![by_name, by_label, other_ns, other_kind];

        let child = object(json!({
            "apiVersion": "ec2.services.k8s.aws/v1alpha1",
            "kind": "VPC",
            "metadata": {"name": "main", "namespace": "cluster-registry", "labels": {"owner": "registry"}}
        }));
        let refs = affected_syncs(&syncs, &child, "ec2.services.k8s.aws/v1alpha1", "VPC");
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["by-name", "by-label"]);

        let child = object(json!({
            "apiVersion": "ec2.services.k8s.aws/v1alpha1",
            "kind": "VPC",
            "metadata": {"name": "secondary", "namespace": "cluster-registry"}
        }));
        assert!(affected_syncs(&syncs, &child, "ec2.services.k8s.aws/v1alpha1", "VPC").is_empty());
    }
}
