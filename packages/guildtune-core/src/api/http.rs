//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to [`MusicService`] for business logic.
//!
//! [`MusicService`]: crate::services::MusicService

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_error, api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::constants::{APP_NAME, SERVICE_ID};
use crate::error::GuildtuneResult;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EnqueueRequest {
    /// Channel of the requester; the room connects there.
    channel: String,
    query: String,
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/rooms", get(list_rooms))
        .route(
            "/api/rooms/{room}/queue",
            post(enqueue).get(list_queue).delete(clear_queue),
        )
        .route("/api/rooms/{room}/queue/{index}", delete(remove_track))
        .route("/api/rooms/{room}/skip", post(skip))
        .route("/api/rooms/{room}/pause", post(pause))
        .route("/api/rooms/{room}/resume", post(resume))
        .route("/api/rooms/{room}/stop", post(stop))
        .route("/api/rooms/{room}/volume", put(set_volume))
        .route("/api/admin/reset", post(reset))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "app": APP_NAME,
        "service": SERVICE_ID,
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.music.registry().len(),
        "limits": {
            "queueCapacity": state.config.queue_capacity,
            "hardCapSecs": state.config.hard_cap_secs,
        }
    }))
}

/// Readiness probe: fails once shutdown has begun.
async fn readiness_check(State(state): State<AppState>) -> Response {
    if state.music.registry().is_accepting() && !state.shutdown.is_cancelled() {
        api_success(json!({ "status": "ready", "ready": true })).into_response()
    } else {
        let mut response = (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down", "ready": false })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        response
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rooms
// ─────────────────────────────────────────────────────────────────────────────

async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "rooms": state.music.rooms() }))
}

async fn enqueue(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Json(payload): Json<EnqueueRequest>,
) -> GuildtuneResult<impl IntoResponse> {
    let outcome = state
        .music
        .enqueue_request(&room, &payload.channel, &payload.query)
        .await?;
    Ok(api_success(outcome))
}

async fn list_queue(State(state): State<AppState>, Path(room): Path<String>) -> impl IntoResponse {
    api_success(state.music.list_queue(&room).await)
}

async fn clear_queue(State(state): State<AppState>, Path(room): Path<String>) -> impl IntoResponse {
    let cleared = state.music.clear_queue(&room).await;
    api_success(json!({ "cleared": cleared }))
}

/// Removes the track at a 1-based queue position.
async fn remove_track(
    State(state): State<AppState>,
    Path((room, index)): Path<(String, usize)>,
) -> GuildtuneResult<impl IntoResponse> {
    let track = state.music.remove_at(&room, index).await?;
    Ok(api_success(json!({ "removed": track })))
}

async fn skip(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> GuildtuneResult<impl IntoResponse> {
    let track = state.music.skip(&room).await?;
    Ok(api_success(json!({ "skipped": track })))
}

async fn pause(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> GuildtuneResult<impl IntoResponse> {
    state.music.pause(&room).await?;
    Ok(api_ok())
}

async fn resume(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> GuildtuneResult<impl IntoResponse> {
    state.music.resume(&room).await?;
    Ok(api_ok())
}

async fn stop(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> GuildtuneResult<impl IntoResponse> {
    state.music.stop(&room).await?;
    Ok(api_ok())
}

async fn set_volume(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Json(payload): Json<VolumeRequest>,
) -> GuildtuneResult<Response> {
    if !payload.volume.is_finite() {
        return Ok(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_volume",
            "volume must be a finite number",
        ));
    }
    let volume = state.music.set_volume(&room, payload.volume).await?;
    Ok(api_success(json!({ "volume": volume })).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin
// ─────────────────────────────────────────────────────────────────────────────

/// Drops every session and the resolution cache.
async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.music.reset().await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::events::BroadcastEventBridge;
    use crate::services::music_service::tests::{fixture, Fixture};
    use crate::state::Config;

    fn app() -> (Router, AppState, Fixture) {
        let f = fixture();
        let state = AppState {
            music: f.service.clone(),
            event_bridge: Arc::new(BroadcastEventBridge::new(16)),
            config: Arc::new(Config::for_test()),
            shutdown: CancellationToken::new(),
        };
        (create_router(state.clone()), state, f)
    }

    async fn send(app: &Router, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_service_and_limits() {
        let (app, _, _f) = app();

        let (status, body) = send(&app, Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_ID);
        assert_eq!(body["limits"]["queueCapacity"], 50);
        assert_eq!(body["success"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_fails_after_shutdown_begins() {
        let (app, state, _f) = app();
        assert_eq!(send(&app, Method::GET, "/ready", None).await.0, StatusCode::OK);

        state.shutdown.cancel();

        let (status, body) = send(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_then_list_queue() {
        let (app, _, _f) = app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/rooms/guild-1/queue",
            Some(json!({ "channel": "general", "query": "first" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], 1);
        assert_eq!(body["title"], "first");

        send(
            &app,
            Method::POST,
            "/api/rooms/guild-1/queue",
            Some(json!({ "channel": "general", "query": "second" })),
        )
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (status, body) = send(&app, Method::GET, "/api/rooms/guild-1/queue", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nowPlaying"], "first");
        assert_eq!(body["tracks"], json!(["second"]));

        let (_, body) = send(&app, Method::GET, "/api/rooms", None).await;
        assert_eq!(body["rooms"][0]["roomId"], "guild-1");
    }

    #[tokio::test(start_paused = true)]
    async fn command_errors_map_to_status_codes() {
        let (app, _, _f) = app();

        let (status, body) = send(&app, Method::POST, "/api/rooms/guild-1/skip", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "not_playing");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/rooms/guild-1/queue",
            Some(json!({ "channel": "general", "query": "missing song" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "track_not_found");

        let (status, body) = send(&app, Method::DELETE, "/api/rooms/guild-1/queue/4", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_clamped_and_must_be_finite() {
        let (app, _, _f) = app();

        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/rooms/guild-1/volume",
            Some(json!({ "volume": 5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["volume"], 2.0);

        // Overflows f32 to infinity.
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/api/rooms/guild-1/volume")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"volume": 1e39}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_reports_dropped_sessions() {
        let (app, _, _f) = app();
        send(
            &app,
            Method::POST,
            "/api/rooms/guild-1/queue",
            Some(json!({ "channel": "general", "query": "a" })),
        )
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (status, body) = send(&app, Method::POST, "/api/admin/reset", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["cacheEntries"], 1);
        let (_, body) = send(&app, Method::GET, "/api/rooms", None).await;
        assert_eq!(body["rooms"], json!([]));
    }
}
