use axum::Json;
use model::ClusterSpec;
use serde_json::{Map, Value, json};

fn error_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Error"}}}
    })
}

fn list_response() -> Value {
    json!({
        "description": "A page of clusters",
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ClusterList"}}}
    })
}

fn spec_response() -> Value {
    json!({
        "description": "The cluster",
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ClusterSpec"}}}
    })
}

fn paging_parameters() -> Vec<Value> {
    vec![
        json!({"name": "offset", "in": "query", "schema": {"type": "integer", "default": 0}}),
        json!({"name": "limit", "in": "query", "schema": {"type": "integer", "default": 200}}),
    ]
}

fn query_parameter(name: &str) -> Value {
    json!({"name": name, "in": "query", "schema": {"type": "string"}})
}

fn name_parameter(name: &str) -> Value {
    json!({"name": name, "in": "path", "required": true, "schema": {"type": "string"}})
}

fn schemas() -> Value {
    let cluster_schema = serde_json::to_value(schemars::schema_for!(ClusterSpec)).unwrap_or(Value::Null);
    let cluster_list = json!({
        "type": "object",
        "properties": {
            "items": {"type": "array", "items": {"$ref": "#/components/schemas/ClusterSpec"}},
            "itemsCount": {"type": "integer"},
            "offset": {"type": "integer"},
            "limit": {"type": "integer"},
            "more": {"type": "boolean"}
        }
    });
    let error = json!({
        "type": "object",
        "properties": {"errors": {"type": "object", "properties": {"body": {"type": "string"}}}}
    });
    let patch_fields = json!({
        "status": {"type": "string", "enum": ["Inactive", "Active", "Deprecated", "Deleted"]},
        "phase": {"type": "string", "enum": ["Building", "Testing", "Running", "Upgrading"]},
        "tags": {"type": "object", "additionalProperties": {"type": "string"}}
    });
    let cluster_patch = json!({
        "type": "object",
        "properties": {"spec": {"type": "object", "properties": patch_fields}}
    });
    json!({
        "ClusterSpec": cluster_schema,
        "ClusterList": cluster_list,
        "Error": error,
        "ClusterPatch": cluster_patch
    })
}

fn cluster_paths() -> Map<String, Value> {
    let mut v1_params: Vec<Value> = ["region", "environment", "businessUnit", "status", "lastUpdated"]
        .into_iter()
        .map(query_parameter)
        .collect();
    v1_params.extend(paging_parameters());

    let mut v2_params = vec![json!({
        "name": "conditions",
        "in": "query",
        "description": "field:<op>value, op one of = > >= < <=; repeatable",
        "style": "form",
        "explode": true,
        "schema": {"type": "array", "items": {"type": "string"}}
    })];
    v2_params.extend(paging_parameters());

    let get_one = json!({
        "summary": "Get a cluster by name or short name",
        "parameters": [name_parameter("name")],
        "responses": {"200": spec_response(), "404": error_response("Unknown cluster")}
    });
    let patch = json!({
        "summary": "Update status, phase or tags on the cluster itself",
        "parameters": [name_parameter("name")],
        "requestBody": {
            "required": true,
            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ClusterPatch"}}}
        },
        "responses": {
            "200": spec_response(),
            "400": error_response("Invalid patch"),
            "403": error_response("Caller may not patch clusters"),
            "404": error_response("Unknown cluster"),
            "500": error_response("Edge cluster unreachable")
        }
    });

    let mut paths = Map::new();
    paths.insert(
        "/api/v1/clusters".into(),
        json!({"get": {
            "summary": "List clusters",
            "parameters": v1_params,
            "responses": {"200": list_response(), "400": error_response("Invalid query")}
        }}),
    );
    paths.insert("/api/v1/clusters/{name}".into(), json!({"get": get_one.clone()}));
    paths.insert(
        "/api/v2/clusters".into(),
        json!({"get": {
            "summary": "List clusters matching every condition",
            "parameters": v2_params,
            "responses": {
                "200": list_response(),
                "400": error_response("Invalid condition"),
                "429": error_response("Rate limited")
            }
        }}),
    );
    paths.insert("/api/v2/clusters/{name}".into(), json!({"get": get_one, "patch": patch}));
    paths
}

fn service_paths() -> Map<String, Value> {
    let mut paths = Map::new();
    paths.insert(
        "/api/v2/services/{serviceId}".into(),
        json!({"get": {
            "summary": "Service metadata by cluster",
            "parameters": [name_parameter("serviceId")],
            "responses": {"200": {"description": "clusterName -> namespace -> key -> value"}}
        }}),
    );
    paths.insert(
        "/api/v2/services/{serviceId}/cluster/{clusterName}".into(),
        json!({"get": {
            "summary": "Service metadata of one cluster",
            "parameters": [name_parameter("serviceId"), name_parameter("clusterName")],
            "responses": {"200": {"description": "namespace -> key -> value"}, "404": error_response("No metadata")}
        }}),
    );
    paths
}

/// OpenAPI document of the public API.
pub(super) async fn doc() -> Json<Value> {
    let mut paths = cluster_paths();
    paths.extend(service_paths());

    Json(json!({
        "openapi": "3.0.3",
        "info": {"title": "Cluster Registry API", "version": env!("CARGO_PKG_VERSION")},
        "components": {
            "securitySchemes": {"bearerAuth": {"type": "http", "scheme": "bearer", "bearerFormat": "JWT"}},
            "schemas": schemas()
        },
        "security": [{"bearerAuth": []}],
        "paths": paths
    }))
}
