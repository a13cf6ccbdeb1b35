use crate::errors::StoreError;
use crate::metrics_defs::{STORE_OPERATION_DURATION, STORE_OPERATION_ERRORS};
use crate::row::{self, CLUSTER_KIND};
use crate::store::ClusterStore;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::timeout::TimeoutConfig;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use model::ClusterSpec;
use model::filter::Predicate;
use serde_json::Value;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default)]
pub struct DynamoDbConfig {
    pub table_name: String,
    pub index_name: String,
    /// Overrides the region of the shared SDK config.
    pub region: Option<String>,
    /// Endpoint override, e.g. DynamoDB local.
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
}

pub struct DynamoDbStore {
    client: Client,
    table_name: String,
    index_name: String,
}

impl DynamoDbStore {
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);

        if let Some(region) = config.region.filter(|r| !r.is_empty()) {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint.filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }
        if let Some(timeout_ms) = config.timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Self::from_client(
            Client::from_conf(builder.build()),
            config.table_name,
            config.index_name,
        )
    }

    pub fn from_client(client: Client, table_name: String, index_name: String) -> Self {
        DynamoDbStore {
            client,
            table_name,
            index_name,
        }
    }

    fn key(name: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(row::NAME.to_string(), AttributeValue::S(name.to_string()))])
    }

    fn item_to_spec(item: &HashMap<String, AttributeValue>) -> Result<ClusterSpec, StoreError> {
        let row = Value::Object(
            item.iter()
                .filter_map(|(k, v)| attr_to_json(v).map(|json| (k.clone(), json)))
                .collect(),
        );
        row::from_row(&row)
    }
}

fn record<T>(operation: &'static str, started: Instant, result: &Result<T, StoreError>) {
    histogram!(STORE_OPERATION_DURATION, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        counter!(STORE_OPERATION_ERRORS, "operation" => operation).increment(1);
        tracing::error!(operation, error = %e, "Store operation failed");
    }
}

fn backend<E>(operation: &'static str) -> impl FnOnce(E) -> StoreError
where
    E: std::error::Error + 'static,
{
    move |e| StoreError::Backend {
        operation,
        reason: DisplayErrorContext(&e).to_string(),
    }
}

#[async_trait]
impl ClusterStore for DynamoDbStore {
    async fn get_cluster(&self, name: &str) -> Result<Option<ClusterSpec>, StoreError> {
        let started = Instant::now();
        let result: Result<Option<ClusterSpec>, StoreError> = async {
            let output = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .set_key(Some(Self::key(name)))
                .send()
                .await
                .map_err(backend("GetItem"))?;
            output.item().map(Self::item_to_spec).transpose()
        }
        .await;
        record("get", started, &result);
        result
    }

    async fn put_cluster(&self, spec: &ClusterSpec) -> Result<(), StoreError> {
        let started = Instant::now();
        let result: Result<(), StoreError> = async {
            let item = match json_to_attr(&row::to_row(spec)?) {
                Some(AttributeValue::M(map)) => map,
                _ => {
                    return Err(StoreError::MalformedRow {
                        name: spec.name.clone(),
                        reason: "row is not an object".into(),
                    });
                }
            };
            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(item))
                .send()
                .await
                .map_err(backend("PutItem"))?;
            Ok(())
        }
        .await;
        record("put", started, &result);
        result
    }

    async fn delete_cluster(&self, name: &str) -> Result<(), StoreError> {
        let started = Instant::now();
        let result: Result<(), StoreError> = async {
            self.client
                .delete_item()
                .table_name(&self.table_name)
                .set_key(Some(Self::key(name)))
                .send()
                .await
                .map_err(backend("DeleteItem"))?;
            Ok(())
        }
        .await;
        record("delete", started, &result);
        result
    }

    async fn query(&self, predicate: &Predicate) -> Result<Vec<ClusterSpec>, StoreError> {
        let started = Instant::now();
        let result: Result<Vec<ClusterSpec>, StoreError> = async {
            let mut expression = FilterExpression::default();
            let filter = expression.compile(predicate);
            let kind_name = expression.name(row::KIND);
            let kind_value = expression.value(CLUSTER_KIND);
            let key_condition = format!("{kind_name} = {kind_value}");

            let mut specs = Vec::new();
            let mut last_evaluated_key = None;
            loop {
                let output = self
                    .client
                    .query()
                    .table_name(&self.table_name)
                    .index_name(&self.index_name)
                    .key_condition_expression(&key_condition)
                    .filter_expression(&filter)
                    .set_expression_attribute_names(Some(expression.names.clone()))
                    .set_expression_attribute_values(Some(expression.values.clone()))
                    .set_exclusive_start_key(last_evaluated_key.take())
                    .send()
                    .await
                    .map_err(backend("Query"))?;

                for item in output.items() {
                    specs.push(Self::item_to_spec(item)?);
                }

                match output.last_evaluated_key() {
                    Some(key) if !key.is_empty() => last_evaluated_key = Some(key.clone()),
                    _ => break,
                }
            }
            Ok(specs)
        }
        .await;
        record("query", started, &result);
        result
    }

    async fn status(&self) -> Result<(), StoreError> {
        let request = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send();
        match tokio::time::timeout(STATUS_TIMEOUT, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(backend("DescribeTable")(e)),
            Err(_) => Err(StoreError::Timeout("DescribeTable")),
        }
    }
}

/// Placeholder tables of a filter expression. Every attribute name goes
/// through a placeholder since several column names are reserved words.
#[derive(Debug, Default)]
struct FilterExpression {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl FilterExpression {
    fn name(&mut self, attribute: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, a)| *a == attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: &str) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values
            .insert(placeholder.clone(), AttributeValue::S(value.to_string()));
        placeholder
    }

    fn compile(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Compare { path, op, value } => {
                let path = path
                    .iter()
                    .map(|segment| self.name(segment))
                    .collect::<Vec<_>>()
                    .join(".");
                let value = self.value(value);
                format!("{path} {} {value}", op.as_str())
            }
            Predicate::And(all) => all
                .iter()
                .map(|p| format!("({})", self.compile(p)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

fn attr_to_json(attr: &AttributeValue) -> Option<Value> {
    match attr {
        AttributeValue::S(s) => Some(Value::String(s.clone())),
        AttributeValue::N(n) => {
            if let Ok(i) = n.parse::<i64>() {
                Some(Value::Number(i.into()))
            } else {
                n.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            }
        }
        AttributeValue::Bool(b) => Some(Value::Bool(*b)),
        AttributeValue::Null(_) => Some(Value::Null),
        AttributeValue::Ss(items) => Some(Value::Array(
            items.iter().cloned().map(Value::String).collect(),
        )),
        AttributeValue::L(items) => Some(Value::Array(
            items.iter().filter_map(attr_to_json).collect(),
        )),
        AttributeValue::M(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| attr_to_json(v).map(|json| (k.clone(), json)))
                .collect(),
        )),
        _ => None,
    }
}

fn json_to_attr(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Null => Some(AttributeValue::Null(true)),
        Value::Bool(b) => Some(AttributeValue::Bool(*b)),
        Value::Number(n) => Some(AttributeValue::N(n.to_string())),
        Value::String(s) => Some(AttributeValue::S(s.clone())),
        Value::Array(items) => Some(AttributeValue::L(
            items.iter().filter_map(json_to_attr).collect(),
        )),
        Value::Object(map) => Some(AttributeValue::M(
            map.iter()
                .filter_map(|(k, v)| json_to_attr(v).map(|attr| (k.clone(), attr)))
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::filter::{Operator, compile, parse_conditions};
    use serde_json::json;

    #[test]
    fn test_compile_uses_placeholders_for_every_name() {
        let mut expression = FilterExpression::default();
        let conditions = parse_conditions(&["extra.domainName:=x.io", "status:=Active"]).unwrap();
        let predicate = Predicate::not_deleted().and(compile(&conditions));
        let text = expression.compile(&predicate);

        assert_eq!(
            text,
            "(#n0 <> :v0) AND (#n1.#n2.#n3 = :v1) AND (#n1.#n0 = :v2)"
        );
        assert_eq!(expression.names["#n0"], "status");
        assert_eq!(expression.names["#n1"], "crd");
        assert_eq!(expression.names["#n3"], "domainName");
        assert_eq!(expression.values[":v0"], AttributeValue::S("Deleted".into()));
        assert_eq!(expression.values[":v2"], AttributeValue::S("Active".into()));
    }

    #[test]
    fn test_compile_reuses_name_placeholders() {
        let mut expression = FilterExpression::default();
        let predicate = Predicate::compare(vec!["name".into()], Operator::Gt, "a")
            .and(Predicate::compare(vec!["name".into()], Operator::Lt, "c"));
        assert_eq!(expression.compile(&predicate), "(#n0 > :v0) AND (#n0 < :v1)");
        assert_eq!(expression.names.len(), 1);
    }

    #[test]
    fn test_item_round_trip() {
        let spec = ClusterSpec {
            name: "c1".into(),
            region: "va7".into(),
            tiers: vec![model::types::Tier {
                name: "worker".into(),
                min_capacity: 3,
                taints: vec!["a".into()],
                ..Default::default()
            }],
            tags: [("onboarding".to_string(), "on".to_string())].into(),
            ..Default::default()
        };
        let item = match json_to_attr(&row::to_row(&spec).unwrap()) {
            Some(AttributeValue::M(map)) => map,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(item["kind"], AttributeValue::S("cluster".into()));
        assert_eq!(DynamoDbStore::item_to_spec(&item).unwrap(), spec);
    }

    #[test]
    fn test_attr_to_json_numbers_and_sets() {
        assert_eq!(attr_to_json(&AttributeValue::N("3".into())), Some(json!(3)));
        assert_eq!(attr_to_json(&AttributeValue::N("1.5".into())), Some(json!(1.5)));
        assert_eq!(
            attr_to_json(&AttributeValue::Ss(vec!["a".into()])),
            Some(json!(["a"]))
        );
    }
}
