use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::warn;

use crate::application::{AppError, RepositoryError, SchedulerError, Supervisor, WatchStatus};
use crate::domain::WatchId;

#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Arc<Supervisor>,
    pub api_token: Option<String>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/watches", get(list_watches).post(add_watch))
        .route(
            "/watches/{id}",
            get(get_watch).patch(update_watch).delete(delete_watch),
        )
        .route("/watches/{id}/start", post(start_watch))
        .route("/watches/{id}/stop", post(stop_watch))
        .with_state(state)
}

pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Domain(_) => StatusCode::BAD_REQUEST,
            AppError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Repository(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Repository(RepositoryError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Scheduler(SchedulerError::MaxWatchesExceeded { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Scheduler(_) => StatusCode::CONFLICT,
            AppError::Fetch(_) | AppError::Notify(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_watches(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match state.supervisor.list().await {
        Ok(v) => Json(v).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
struct AddWatch {
    url: String,
    interval_seconds: Option<u64>,
    #[serde(default)]
    start: bool,
}

async fn add_watch(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<AddWatch>,
) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match create(&state.supervisor, body).await {
        Ok(status) => (StatusCode::CREATED, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// With `start: true` the request is all or nothing: if the loop cannot be
/// started the new record is removed again before the error is returned.
async fn create(sup: &Supervisor, body: AddWatch) -> ApiResult<WatchStatus> {
    let interval = body
        .interval_seconds
        .unwrap_or(sup.config().intervals.default_secs);
    let watch = sup.add(&body.url, interval).await?;
    if body.start {
        if let Err(e) = sup.start(watch.id).await {
            if let Err(undo) = sup.delete(watch.id).await {
                warn!(watch_id = %watch.id, error = %undo, "failed to remove watch after start error");
            }
            return Err(e.into());
        }
    }
    Ok(sup.get(watch.id).await?)
}

async fn get_watch(
    State(state): State<ApiState>,
    Path(id): Path<WatchId>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match state.supervisor.get(id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
struct UpdateWatch {
    interval_seconds: u64,
}

async fn update_watch(
    State(state): State<ApiState>,
    Path(id): Path<WatchId>,
    headers: HeaderMap,
    Json(body): Json<UpdateWatch>,
) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match reschedule(&state.supervisor, id, body.interval_seconds).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn reschedule(sup: &Supervisor, id: WatchId, interval_secs: u64) -> ApiResult<WatchStatus> {
    sup.set_interval(id, interval_secs).await?;
    Ok(sup.get(id).await?)
}

async fn start_watch(
    State(state): State<ApiState>,
    Path(id): Path<WatchId>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match state.supervisor.start(id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn stop_watch(
    State(state): State<ApiState>,
    Path(id): Path<WatchId>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match state.supervisor.stop(id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn delete_watch(
    State(state): State<ApiState>,
    Path(id): Path<WatchId>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&headers, &state.api_token) {
        return resp;
    }
    match state.supervisor.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

fn check_auth(headers: &HeaderMap, token: &Option<String>) -> Result<(), Response> {
    let Some(expected) = token else {
        return Ok(());
    };
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if auth == format!("Bearer {}", expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized").into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::usecases::CheckWatchUseCase;
    use crate::application::{ChangeEngine, SupervisorConfig};
    use crate::infrastructure::console_notifier::ConsoleNotifier;
    use crate::infrastructure::fake_fetcher::ScriptedFetcher;
    use crate::infrastructure::memory_store::InMemoryWatchRepository;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(token: Option<&str>) -> (Router, Arc<Supervisor>) {
        app_with(token, SupervisorConfig::default())
    }

    fn app_with(token: Option<&str>, config: SupervisorConfig) -> (Router, Arc<Supervisor>) {
        let repo = Arc::new(InMemoryWatchRepository::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push_body("A");
        let engine = Arc::new(ChangeEngine::new(CheckWatchUseCase {
            fetcher,
            notifier: Arc::new(ConsoleNotifier::new()),
            repo: repo.clone(),
            fetch_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        }));
        let supervisor = Arc::new(Supervisor::new(repo, engine, config));
        let router = build_router(ApiState {
            supervisor: supervisor.clone(),
            api_token: token.map(str::to_string),
        });
        (router, supervisor)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_200() {
        let (app, _) = app(None);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_uses_default_interval_and_stays_idle() {
        let (app, _) = app(None);
        let resp = app
            .oneshot(json_request(
                "POST",
                "/watches",
                serde_json::json!({ "url": "https://example.com/" }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["interval_secs"], 60);
        assert_eq!(body["active"], false);
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["store_failures"], 0);
    }

    #[tokio::test]
    async fn refused_start_leaves_no_record_behind() {
        let (app, sup) = app_with(
            None,
            SupervisorConfig {
                max_watches: 1,
                ..SupervisorConfig::default()
            },
        );
        let first = sup.add("https://example.com/", 60).await.unwrap();
        sup.start(first.id).await.unwrap();

        let resp = app
            .oneshot(json_request(
                "POST",
                "/watches",
                serde_json::json!({ "url": "https://example.org/", "start": true }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let remaining = sup.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].watch.id, first.id);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn short_interval_is_a_bad_request() {
        let (app, _) = app(None);
        let resp = app
            .oneshot(json_request(
                "POST",
                "/watches",
                serde_json::json!({ "url": "https://example.com/", "interval_seconds": 3 }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_twice_conflicts() {
        let (app, sup) = app(None);
        let watch = sup.add("https://example.com/", 60).await.unwrap();
        let uri = format!("/watches/{}/start", watch.id);

        let first = app
            .clone()
            .oneshot(json_request("POST", &uri, serde_json::json!({})))
            .await
            .unwrap();
        let second = app
            .oneshot(json_request("POST", &uri, serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert_eq!(second.status(), StatusCode::CONFLICT);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn delete_unknown_is_404() {
        let (app, _) = app(None);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/watches/77")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_updates_interval() {
        let (app, sup) = app(None);
        let watch = sup.add("https://example.com/", 60).await.unwrap();

        let resp = app
            .oneshot(json_request(
                "PATCH",
                &format!("/watches/{}", watch.id),
                serde_json::json!({ "interval_seconds": 10 }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["interval_secs"], 10);
    }

    #[tokio::test]
    async fn token_is_enforced() {
        let (app, _) = app(Some("s3cret"));
        let denied = app
            .clone()
            .oneshot(Request::builder().uri("/watches").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/watches")
                    .header("authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
