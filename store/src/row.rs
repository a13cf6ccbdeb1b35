use crate::errors::StoreError;
use model::ClusterSpec;
use serde_json::{Value, json};

pub const NAME: &str = "name";
pub const KIND: &str = "kind";
pub const REGION: &str = "region";
pub const ENVIRONMENT: &str = "environment";
pub const STATUS: &str = "status";
pub const CRD: &str = "crd";

/// Secondary index partition value shared by every row.
pub const CLUSTER_KIND: &str = "cluster";

/// Builds the persisted row, regenerating the indexed columns from the spec.
pub fn to_row(spec: &ClusterSpec) -> Result<Value, StoreError> {
    Ok(json!({
        NAME: spec.name,
        KIND: CLUSTER_KIND,
        REGION: spec.region,
        ENVIRONMENT: spec.environment,
        STATUS: spec.status,
        CRD: serde_json::to_value(spec)?,
    }))
}

pub fn from_row(row: &Value) -> Result<ClusterSpec, StoreError> {
    let name = row
        .get(NAME)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let crd = row.get(CRD).cloned().ok_or_else(|| StoreError::MalformedRow {
        name: name.clone(),
        reason: "missing crd column".into(),
    })?;
    serde_json::from_value(crd).map_err(|e| StoreError::MalformedRow {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_columns_follow_spec() {
        let spec = ClusterSpec {
            name: "c1".into(),
            region: "va7".into(),
            environment: "prod".into(),
            status: "Active".into(),
            ..Default::default()
        };
        let row = to_row(&spec).unwrap();
        assert_eq!(row[KIND], "cluster");
        assert_eq!(row[REGION], "va7");
        assert_eq!(row[CRD]["name"], "c1");
        assert_eq!(from_row(&row).unwrap(), spec);
    }

    #[test]
    fn test_missing_crd_is_malformed() {
        let err = from_row(&json!({"name": "c1"})).unwrap_err();
        assert!(matches!(err, StoreError::MalformedRow { .. }));
    }
}
