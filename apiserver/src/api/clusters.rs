use super::{AppState, ClusterList, DEFAULT_LIMIT};
use crate::auth::Claims;
use crate::errors::ApiError;
use crate::patch_router::ClusterPatch;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, RawQuery, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use model::ClusterSpec;
use model::filter::parse_conditions;
use serde::Deserialize;
use store::{ClusterPage, ListFilter};

pub(super) fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/clusters", get(list_v1))
        .route("/clusters/{name}", get(get_cluster))
}

pub(super) fn v2_routes() -> Router<AppState> {
    Router::new()
        .route("/clusters", get(list_v2))
        .route("/clusters/{name}", get(get_cluster).patch(patch_cluster))
}

fn into_list(page: ClusterPage, offset: usize, limit: usize) -> Json<ClusterList> {
    Json(ClusterList {
        items_count: page.count,
        items: page.items,
        offset,
        limit,
        more: page.more,
    })
}

fn effective_limit(limit: Option<usize>) -> usize {
    limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1Params {
    #[serde(default)]
    region: String,
    #[serde(default)]
    environment: String,
    #[serde(default)]
    business_unit: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    last_updated: String,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_v1(
    State(state): State<AppState>,
    params: Result<Query<V1Params>, QueryRejection>,
) -> Result<Json<ClusterList>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let offset = params.offset.unwrap_or(0);
    let limit = effective_limit(params.limit);
    let filter = ListFilter {
        region: params.region,
        environment: params.environment,
        business_unit: params.business_unit,
        status: params.status,
        last_updated: params.last_updated,
    };

    let page = state.store.list_clusters(offset, limit, &filter).await?;
    Ok(into_list(page, offset, limit))
}

/// Query of the v2 listing. `conditions` may repeat, which the derive based
/// extractors cannot express.
#[derive(Debug, Default, PartialEq)]
struct V2Params {
    conditions: Vec<String>,
    offset: usize,
    limit: Option<usize>,
}

impl V2Params {
    fn parse(query: Option<&str>) -> Result<Self, ApiError> {
        let mut params = V2Params::default();
        let Some(query) = query else {
            return Ok(params);
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "conditions" => params.conditions.push(value.into_owned()),
                "offset" => params.offset = parse_number("offset", &value)?,
                "limit" => params.limit = Some(parse_number("limit", &value)?),
                _ => {}
            }
        }
        Ok(params)
    }
}

fn parse_number(name: &str, value: &str) -> Result<usize, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::Validation(format!("{name} must be a non-negative integer, got {value:?}")))
}

async fn list_v2(State(state): State<AppState>, RawQuery(query): RawQuery) -> Result<Json<ClusterList>, ApiError> {
    let params = V2Params::parse(query.as_deref())?;
    let conditions = parse_conditions(&params.conditions)?;
    let limit = effective_limit(params.limit);

    let page = state
        .store
        .list_clusters_with_filter(params.offset, limit, &conditions)
        .await?;
    Ok(into_list(page, params.offset, limit))
}

async fn get_cluster(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<ClusterSpec>, ApiError> {
    Ok(Json(state.find_cluster(&name).await?))
}

#[derive(Debug, Deserialize)]
struct PatchRequest {
    spec: ClusterPatch,
}

async fn patch_cluster(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(name): Path<String>,
    body: Result<Json<PatchRequest>, JsonRejection>,
) -> Result<Json<ClusterSpec>, ApiError> {
    if !claims.is_member_of(&state.authorized_group_id) {
        return Err(ApiError::Forbidden(format!(
            "caller is not a member of group {}",
            state.authorized_group_id
        )));
    }
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    request.spec.validate()?;

    let mut target = state.find_cluster(&name).await?;
    state.patcher.patch(&target, &request.spec).await?;

    request.spec.apply(&mut target);
    Ok(Json(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{cluster, test_app};
    use crate::testutils::StaticVerifier;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use store::ClusterStore;

    #[test]
    fn test_v2_params() {
        let params = V2Params::parse(Some("conditions=region:=va7&conditions=status:=Active&offset=2")).unwrap();
        assert_eq!(params.conditions, vec!["region:=va7", "status:=Active"]);
        assert_eq!(params.offset, 2);
        assert_eq!(params.limit, None);
        assert!(V2Params::parse(Some("limit=-1")).is_err());
        assert_eq!(V2Params::parse(None).unwrap(), V2Params::default());
    }

    #[tokio::test]
    async fn test_v1_list_excludes_deleted_by_default() {
        let app = test_app(None);
        app.seed(cluster("c1", "useast1", "prod", "Active")).await;
        app.seed(cluster("c2", "useast1", "prod", "Deleted")).await;

        let (status, body) = app.get("/api/v1/clusters").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["itemsCount"], 1);
        assert_eq!(body["items"][0]["name"], "c1");
        assert_eq!(body["limit"], 200);
        assert_eq!(body["offset"], 0);
        assert_eq!(body["more"], false);

        let (_, body) = app.get("/api/v1/clusters?status=Deleted").await;
        assert_eq!(body["itemsCount"], 1);
        assert_eq!(body["items"][0]["name"], "c2");
    }

    #[tokio::test]
    async fn test_v1_list_filters_and_pages() {
        let app = test_app(None);
        for i in 0..5 {
            app.seed(cluster(&format!("c{i}"), "useast1", "prod", "Active")).await;
        }
        app.seed(cluster("w1", "uswest2", "dev", "Active")).await;

        let (_, body) = app.get("/api/v1/clusters?region=useast1&offset=1&limit=2").await;
        assert_eq!(body["itemsCount"], 2);
        assert_eq!(body["items"][0]["name"], "c1");
        assert_eq!(body["more"], true);

        let (_, body) = app.get("/api/v1/clusters?region=useast1&offset=4&limit=2").await;
        assert_eq!(body["itemsCount"], 1);
        assert_eq!(body["more"], false);

        let (_, body) = app.get("/api/v1/clusters?environment=dev").await;
        assert_eq!(body["items"][0]["name"], "w1");
    }

    #[tokio::test]
    async fn test_v1_list_rejects_bad_input() {
        let app = test_app(None);
        let (status, body) = app.get("/api/v1/clusters?lastUpdated=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["body"].as_str().unwrap().contains("yesterday"));

        let (status, _) = app.get("/api/v1/clusters?limit=many").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_v2_list_with_conditions() {
        let app = test_app(None);
        let mut azure = cluster("c1", "va7", "prod", "Active");
        azure.cloud_type = "azure".into();
        app.seed(azure).await;
        app.seed(cluster("c2", "va7", "prod", "Active")).await;
        let mut deleted = cluster("c3", "va7", "prod", "Deleted");
        deleted.cloud_type = "azure".into();
        app.seed(deleted).await;

        let (status, body) = app.get("/api/v2/clusters?conditions=cloudType:=azure").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["itemsCount"], 1);
        assert_eq!(body["items"][0]["name"], "c1");

        // deleted clusters never match, even when asked for
        let (_, body) = app.get("/api/v2/clusters?conditions=status:=Deleted").await;
        assert_eq!(body["itemsCount"], 0);
    }

    #[tokio::test]
    async fn test_v2_list_rejects_malformed_condition() {
        let app = test_app(None);
        let (status, body) = app.get("/api/v2/clusters?conditions=cloudType").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"errors": {"body": "invalid query"}}));
    }

    #[tokio::test]
    async fn test_get_with_short_name_fallback() {
        let app = test_app(None);
        app.seed(cluster("cluster01-prod-useast1", "useast1", "prod", "Active")).await;

        let (status, body) = app.get("/api/v1/clusters/cluster01-prod-useast1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["region"], "useast1");

        let (status, body) = app.get("/api/v2/clusters/cluster01produseast1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "cluster01-prod-useast1");

        assert_eq!(app.get("/api/v1/clusters/cluster02produseast1").await.0, StatusCode::NOT_FOUND);
        assert_eq!(app.get("/api/v1/clusters/nonsense").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_patch_requires_group() {
        let app = test_app(None);
        app.seed(cluster("c1", "useast1", "prod", "Active")).await;

        let body = json!({"spec": {"tags": {"onboarding": "on"}}});
        let (status, _) = app
            .call(Method::PATCH, "/api/v2/clusters/c1", Some(StaticVerifier::READER), Some(body))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(app.patcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_patch_forwards_to_edge() {
        let app = test_app(None);
        app.seed(cluster("cluster01-prod-useast1", "useast1", "prod", "Active")).await;

        let body = json!({"spec": {"tags": {"onboarding": "on"}}});
        let (status, response) = app
            .call(
                Method::PATCH,
                "/api/v2/clusters/cluster01-prod-useast1",
                Some(StaticVerifier::ADMIN),
                Some(body),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["tags"]["onboarding"], "on");

        let calls = app.patcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "cluster01-prod-useast1");

        // the central store is left to replication
        let stored = app.store.get_cluster("cluster01-prod-useast1").await.unwrap().unwrap();
        assert!(stored.tags.is_empty());
    }

    #[tokio::test]
    async fn test_patch_validation() {
        let app = test_app(None);
        app.seed(cluster("c1", "useast1", "prod", "Active")).await;

        for body in [
            json!({"spec": {"status": "Gone"}}),
            json!({"spec": {"tags": {"owner": "me"}}}),
            json!({"spec": {"region": "va7"}}),
            json!({"status": "Active"}),
        ] {
            let (status, _) = app
                .call(Method::PATCH, "/api/v2/clusters/c1", Some(StaticVerifier::ADMIN), Some(body.clone()))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        }

        let (status, _) = app
            .call(
                Method::PATCH,
                "/api/v2/clusters/missing",
                Some(StaticVerifier::ADMIN),
                Some(json!({"spec": {"status": "Active"}})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(app.patcher.calls().is_empty());
    }
}
