//! REST adapter over [`AdminService`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use objstore_policy::SweepReport;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::api::{
    AddLifecyclePolicyRequest, AddReplicationPolicyRequest, AdminService, ApiError,
    RecordChangeRequest, TriggerSyncRequest,
};

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.kind,
            "message": self.message,
        }));
        (status, body).into_response()
    }
}

/// Success body: the payload's fields next to `success: true`. Bulk runs with per-object
/// failures still succeed; callers read the failure counts.
#[derive(Debug, Serialize)]
struct Success<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

#[derive(Debug, Serialize)]
struct ApplyResponse {
    message: &'static str,
    #[serde(flatten)]
    report: SweepReport,
}

/// Builds the admin router with request tracing.
pub fn router(service: Arc<AdminService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/v1/policies",
            get(list_lifecycle_handler).post(add_lifecycle_handler),
        )
        .route("/api/v1/policies/apply", post(apply_lifecycle_handler))
        .route("/api/v1/policies/:id", delete(remove_lifecycle_handler))
        .route(
            "/api/v1/replication/policies",
            get(list_replication_handler).post(add_replication_handler),
        )
        .route(
            "/api/v1/replication/policies/:id",
            get(get_replication_handler).delete(remove_replication_handler),
        )
        .route("/api/v1/replication/trigger", post(trigger_sync_handler))
        .route("/api/v1/replication/changes", post(record_change_handler))
        .route("/api/v1/replication/status/:id", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serves the admin API on `addr` until `shutdown` resolves.
pub async fn serve<F>(service: Arc<AdminService>, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Admin API listening on {}", addr);

    axum::serve(listener, router(service).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler(State(service): State<Arc<AdminService>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": service.facade().backend_names(),
    }))
}

async fn list_lifecycle_handler(State(service): State<Arc<AdminService>>) -> impl IntoResponse {
    ok(service.list_lifecycle_policies())
}

async fn add_lifecycle_handler(
    State(service): State<Arc<AdminService>>,
    Json(req): Json<AddLifecyclePolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = service.add_lifecycle_policy(req).await?;
    Ok((StatusCode::CREATED, ok(view)))
}

async fn remove_lifecycle_handler(
    State(service): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.remove_lifecycle_policy(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn apply_lifecycle_handler(
    State(service): State<Arc<AdminService>>,
) -> Result<impl IntoResponse, ApiError> {
    let report = service.apply_lifecycle_policies().await?;
    Ok(ok(ApplyResponse {
        message: "lifecycle policies applied",
        report,
    }))
}

async fn list_replication_handler(State(service): State<Arc<AdminService>>) -> impl IntoResponse {
    ok(service.list_replication_policies())
}

async fn add_replication_handler(
    State(service): State<Arc<AdminService>>,
    Json(req): Json<AddReplicationPolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = service.add_replication_policy(req).await?;
    Ok((StatusCode::CREATED, ok(policy)))
}

async fn get_replication_handler(
    State(service): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(service.get_replication_policy(&id)?))
}

async fn remove_replication_handler(
    State(service): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.remove_replication_policy(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_sync_handler(
    State(service): State<Arc<AdminService>>,
    req: Option<Json<TriggerSyncRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    Ok(ok(service.trigger_sync(req).await?))
}

async fn record_change_handler(
    State(service): State<Arc<AdminService>>,
    Json(req): Json<RecordChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = service.record_change(req).await?;
    Ok((StatusCode::CREATED, ok(event)))
}

async fn status_handler(
    State(service): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(service.replication_status(&id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjstoreConfig;
    use axum::body::Body;
    use axum::http::{header, Request};
    use bytes::Bytes;
    use objstore_storage::BackendConfig;
    use std::collections::HashMap;
    use tower::ServiceExt;

    async fn service() -> Arc<AdminService> {
        let mut config = ObjstoreConfig::default();
        config.backends = HashMap::from([
            ("local".to_string(), BackendConfig::new("memory")),
            ("s3".to_string(), BackendConfig::new("memory")),
        ]);
        config.replication.scheduler_enabled = false;
        Arc::new(AdminService::from_config(&config).await.unwrap())
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = router(service().await);
        let response = router.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backends"], serde_json::json!(["local", "s3"]));
    }

    #[tokio::test]
    async fn test_lifecycle_routes() {
        let router = router(service().await);
        let policy = serde_json::json!({
            "id": "p1",
            "prefix": "logs/",
            "retention_seconds": 86400,
            "action": "delete"
        });

        let response = router
            .clone()
            .oneshot(json_request("POST", "/api/v1/policies", policy.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .clone()
            .oneshot(json_request("POST", "/api/v1/policies", policy))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "conflict");

        let response = router
            .clone()
            .oneshot(empty_request("GET", "/api/v1/policies"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["policies"][0]["id"], "p1");

        let response = router
            .clone()
            .oneshot(empty_request("POST", "/api/v1/policies/apply"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["policies_count"], 1);
        assert_eq!(json["objects_processed"], 0);

        let response = router
            .clone()
            .oneshot(empty_request("DELETE", "/api/v1/policies/p1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(empty_request("DELETE", "/api/v1/policies/p1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replication_routes() {
        let service = service().await;
        service.facade().put("local:a.txt", Bytes::from_static(b"hello")).await.unwrap();
        let router = router(service.clone());

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/replication/policies",
                serde_json::json!({
                    "id": "r1",
                    "source_backend": "local",
                    "destination_backend": "s3",
                    "check_interval_seconds": 300
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["check_interval_ms"], 300_000);
        assert_eq!(json["enabled"], true);

        let response = router
            .clone()
            .oneshot(empty_request("GET", "/api/v1/replication/status/r1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/replication/trigger",
                serde_json::json!({ "policy_id": "r1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["synced"], 1);
        assert_eq!(json["bytes_total"], 5);

        let response = router
            .clone()
            .oneshot(empty_request("POST", "/api/v1/replication/trigger"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["policy_id"], "all");

        let response = router
            .clone()
            .oneshot(empty_request("GET", "/api/v1/replication/status/r1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total_objects_synced"], 2);
        assert_eq!(json["sync_count"], 2);

        let response = router
            .clone()
            .oneshot(empty_request("GET", "/api/v1/replication/policies/r1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert!(json["last_sync_time"].is_string());

        let response = router
            .clone()
            .oneshot(empty_request("DELETE", "/api/v1/replication/policies/r1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(empty_request("GET", "/api/v1/replication/policies"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["count"], 0);
        assert!(service.facade().exists("s3:a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_incremental_trigger_route() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ObjstoreConfig::default();
        config.backends = HashMap::from([
            ("local".to_string(), BackendConfig::new("memory")),
            ("s3".to_string(), BackendConfig::new("memory")),
        ]);
        config.replication.scheduler_enabled = false;
        config.replication.change_log = Some(dir.path().join("changes.jsonl"));
        let service = Arc::new(AdminService::from_config(&config).await.unwrap());
        service.facade().put("s3:stale", Bytes::from_static(b"x")).await.unwrap();
        let router = router(service.clone());

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/replication/policies",
                serde_json::json!({
                    "id": "r1",
                    "source_backend": "local",
                    "destination_backend": "s3",
                    "check_interval_seconds": 60
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/replication/changes",
                serde_json::json!({ "key": "stale", "operation": "delete" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["operation"], "delete");

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/replication/trigger",
                serde_json::json!({ "policy_id": "r1", "incremental": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["deleted"], 1);

        let response = router
            .oneshot(empty_request("GET", "/api/v1/replication/status/r1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total_objects_deleted"], 1);
        assert!(!service.facade().exists("s3:stale").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_mode_is_bad_request() {
        let router = router(service().await);
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/v1/replication/policies",
                serde_json::json!({
                    "id": "r1",
                    "source_backend": "local",
                    "destination_backend": "s3",
                    "check_interval_seconds": 60,
                    "replication_mode": "mirror"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "validation");
    }
}
