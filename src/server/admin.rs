//! Admin JSON API
//!
//! A thin layer over [`HookStore`]:
//!
//! - `GET    /hooks`
//! - `POST   /hooks` `{id}`
//! - `GET    /hooks/:id`
//! - `DELETE /hooks/:id`
//! - `POST   /hooks/:id/components` `{type, params}`
//! - `DELETE /hooks/:id/components/:instance`
//! - `POST   /hooks/:id/components/:instance/move` `{direction}`
//! - `GET    /hooks/:id/params/:type`
//! - `PUT    /hooks/:id/params/:type` `{params}`
//! - `GET    /components`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::components::Params;
use crate::hooks::{Direction, HookStore, HookStoreError, HookSummary};
use crate::server::auth::authorize_admin;

/// Admin API configuration
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    /// Bearer token; when unset only loopback clients are admitted
    pub token: Option<String>,
}

#[derive(Clone)]
struct AdminState {
    config: Arc<AdminConfig>,
    hooks: HookStore,
}

#[derive(Debug, Deserialize)]
struct CreateHookRequest {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AttachRequest {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    params: Params,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    direction: Direction,
}

#[derive(Debug, Deserialize)]
struct ParamsRequest {
    #[serde(default)]
    params: Params,
}

/// Create the admin router.
pub fn create_admin_router(config: AdminConfig, hooks: HookStore) -> Router {
    let state = AdminState {
        config: Arc::new(config),
        hooks,
    };

    Router::new()
        .route("/hooks", get(list_hooks).post(create_hook))
        .route("/hooks/:id", get(get_hook).delete(delete_hook))
        .route("/hooks/:id/components", post(attach_component))
        .route(
            "/hooks/:id/components/:instance",
            axum::routing::delete(detach_component),
        )
        .route(
            "/hooks/:id/components/:instance/move",
            post(move_component),
        )
        .route(
            "/hooks/:id/params/:type",
            get(get_params).put(put_params),
        )
        .route("/components", get(list_components))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    if !authorize_admin(state.config.token.as_deref(), request.headers(), remote) {
        warn!(target: "admin", remote = ?remote, path = %request.uri().path(), "unauthorized admin request");
        return unauthorized_response();
    }
    next.run(request).await
}

async fn list_hooks(State(state): State<AdminState>) -> Response {
    match state.hooks.list().await {
        Ok(hooks) => Json(hooks).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn create_hook(
    State(state): State<AdminState>,
    Json(body): Json<CreateHookRequest>,
) -> Response {
    match state.hooks.create(&body.id).await {
        Ok(hook) => {
            info!(target: "admin", hook = %hook.id, "hook created");
            (StatusCode::CREATED, Json(hook)).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn get_hook(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let hook = match state.hooks.find(&id).await {
        Ok(hook) => hook,
        Err(e) => return store_error_response(e),
    };
    match state.hooks.count(&id, Utc::now()).await {
        Ok(count) => Json(HookSummary { hook, count }).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn delete_hook(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.hooks.delete(&id).await {
        Ok(()) => {
            info!(target: "admin", hook = %id, "hook deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn attach_component(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(body): Json<AttachRequest>,
) -> Response {
    match state
        .hooks
        .attach_component(&id, &body.type_name, body.params)
        .await
    {
        Ok(instance) => {
            info!(target: "admin", hook = %id, component = %instance.name, instance = %instance.id, "component attached");
            (StatusCode::CREATED, Json(instance)).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn detach_component(
    State(state): State<AdminState>,
    Path((id, instance)): Path<(String, String)>,
) -> Response {
    match state.hooks.detach_component(&id, &instance).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn move_component(
    State(state): State<AdminState>,
    Path((id, instance)): Path<(String, String)>,
    Json(body): Json<MoveRequest>,
) -> Response {
    match state
        .hooks
        .move_component(&id, &instance, body.direction)
        .await
    {
        Ok(hook) => Json(hook).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn get_params(
    State(state): State<AdminState>,
    Path((id, type_name)): Path<(String, String)>,
) -> Response {
    match state.hooks.component_params(&id, &type_name).await {
        Ok(params) => Json(params).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn put_params(
    State(state): State<AdminState>,
    Path((id, type_name)): Path<(String, String)>,
    Json(body): Json<ParamsRequest>,
) -> Response {
    match state
        .hooks
        .reconfigure_component(&id, &type_name, body.params)
        .await
    {
        Ok(()) => {
            info!(target: "admin", hook = %id, component = %type_name, "component reconfigured");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn list_components(State(state): State<AdminState>) -> Response {
    Json(state.hooks.registry().all_registered()).into_response()
}

fn store_error_response(err: HookStoreError) -> Response {
    let (status, kind) = match &err {
        HookStoreError::EmptyId | HookStoreError::InvalidCharacters(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request")
        }
        HookStoreError::AlreadyExists(_) => (StatusCode::CONFLICT, "conflict"),
        HookStoreError::NotFound(_)
        | HookStoreError::ComponentNotFound { .. }
        | HookStoreError::ComponentNotAttached { .. } => (StatusCode::NOT_FOUND, "not_found"),
        HookStoreError::UnknownComponentType(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        HookStoreError::Config(e) if !e.is_storage() => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_config")
        }
        HookStoreError::Config(_) | HookStoreError::Storage(_) => {
            error!(target: "admin", error = %err, "store failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "internal error".to_string()
    } else {
        err.to_string()
    };
    (
        status,
        Json(json!({
            "error": {
                "message": message,
                "type": kind,
            }
        })),
    )
        .into_response()
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {
                "message": "Unauthorized",
                "type": "unauthorized"
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ComponentRegistry, ComponentSettings};
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const TOKEN: &str = "admin-secret";

    async fn test_router() -> (Router, HookStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("admin.db")).await.unwrap();
        let settings = ComponentSettings {
            artifact_dir: dir.path().join("log"),
            ..ComponentSettings::default()
        };
        let registry = Arc::new(ComponentRegistry::builtin(&settings));
        let hooks = HookStore::new(store, registry);
        let router = create_admin_router(
            AdminConfig {
                token: Some(TOKEN.to_string()),
            },
            hooks.clone(),
        );
        (router, hooks, dir)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> HttpRequest<Body> {
        let builder = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {TOKEN}"));
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (router, _hooks, _dir) = test_router().await;
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/hooks")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_hook_lifecycle() {
        let (router, hooks, _dir) = test_router().await;

        let response = router
            .clone()
            .oneshot(request("POST", "/hooks", Some(json!({ "id": "deploy" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .clone()
            .oneshot(request("POST", "/hooks", Some(json!({ "id": "deploy" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .clone()
            .oneshot(request("POST", "/hooks", Some(json!({ "id": "Bad Id" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(request("GET", "/hooks/deploy", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], "deploy");
        assert_eq!(body["count"]["total"], 0);

        let response = router
            .clone()
            .oneshot(request("GET", "/hooks", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = router
            .clone()
            .oneshot(request("DELETE", "/hooks/deploy", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(hooks.find("deploy").await.is_err());
    }

    #[tokio::test]
    async fn test_component_management() {
        let (router, hooks, _dir) = test_router().await;
        hooks.create("gh").await.unwrap();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/hooks/gh/components",
                Some(json!({ "type": "github-validator", "params": { "secret": "one" } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let validator_id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/hooks/gh/components",
                Some(json!({ "type": "log-action" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/hooks/gh/components",
                Some(json!({ "type": "rate-limit-filter", "params": { "amount": "x", "interval": "1" } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = router
            .clone()
            .oneshot(request(
                "PUT",
                "/hooks/gh/params/github-validator",
                Some(json!({ "params": { "secret": "two" } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .clone()
            .oneshot(request("GET", "/hooks/gh/params/github-validator", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({ "secret": "two" }));

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/hooks/gh/components/{validator_id}/move"),
                Some(json!({ "direction": "down" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["components"][1]["id"], validator_id.as_str());

        let response = router
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/hooks/gh/components/{validator_id}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .clone()
            .oneshot(request("DELETE", "/hooks/gh/components/unknown", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_components() {
        let (router, _hooks, _dir) = test_router().await;
        let response = router
            .oneshot(request("GET", "/components", None))
            .await
            .unwrap();
        let body = body_json(response).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"github-validator"));
        assert!(names.contains(&"log-action"));
    }
}
