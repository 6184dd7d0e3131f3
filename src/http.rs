//! # HTTP Surface
//!
//! JSON API over the shared state and the command relay.
//!
//! Read endpoints answer `{}` for unknown keys and indices. Unknown routes
//! answer `{}` as well, with status 200. POST endpoints always answer
//! 200 with a [`CommandResponse`] body.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde_json::{Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::HttpConfig;
use crate::error::Result;
use crate::relay::{CommandRelay, CommandResponse};
use crate::store::statistics::Timestamp;
use crate::store::{self, SharedStore};

/// State shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub relay: CommandRelay,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get/all", get(get_all))
        .route("/get/version", get(get_version))
        .route("/get/statistics", get(get_statistics))
        .route("/get/message/all", get(get_message_all))
        .route("/get/message/:key", get(get_message))
        .route("/get/message/:key/:field", get(get_message_field))
        .route("/get/parameter/all", get(get_parameter_all))
        .route("/get/parameter/:name", get(get_parameter))
        .route("/get/plan/all", get(get_plan_all))
        .route("/get/plan/:index", get(get_plan))
        .route("/get/fence/all", get(get_fence_all))
        .route("/get/fence/:index", get(get_fence))
        .route("/get/rally/all", get(get_rally_all))
        .route("/get/rally/:index", get(get_rally))
        .route("/get/custom/all", get(get_custom_all))
        .route("/get/custom/:key", get(get_custom))
        .route("/post/command_long", post(post_command_long))
        .route("/post/command_int", post(post_command_int))
        .route("/post/param_set", post(post_param_set))
        .route("/post/plan", post(post_plan))
        .route("/post/rally", post(post_rally))
        .route("/post/fence", post(post_fence))
        .route("/post/custom", post(post_custom))
        .route("/post/custom/all", post(post_custom_all))
        .route("/post/message", post(post_message))
        .route("/set/:argument", post(set_argument))
        .fallback(not_found)
        .with_state(state)
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until the listener fails
///
/// # Errors
///
/// Returns error if the address cannot be bound or the server stops
pub async fn serve(config: &HttpConfig, state: AppState) -> Result<()> {
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("HTTP API listening on {}", address);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn empty() -> Json<Value> {
    Json(Value::Object(Map::new()))
}

async fn not_found() -> Json<Value> {
    empty()
}

async fn get_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().all_json())
}

async fn get_version() -> Json<Value> {
    Json(store::version_json())
}

async fn get_statistics(State(app): State<AppState>) -> Json<Value> {
    let mut state = app.store.write();
    state.record_api(Timestamp::now());
    Json(state.statistics_json())
}

async fn get_message_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().message_all_json())
}

async fn get_message(State(app): State<AppState>, Path(key): Path<String>) -> Json<Value> {
    Json(app.store.read().message_json(&key))
}

async fn get_message_field(
    State(app): State<AppState>,
    Path((key, field)): Path<(String, String)>,
) -> Json<Value> {
    Json(app.store.read().message_field_json(&key, &field))
}

async fn get_parameter_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().parameter_all_json())
}

async fn get_parameter(State(app): State<AppState>, Path(name): Path<String>) -> Json<Value> {
    Json(app.store.read().parameter_json(&name))
}

async fn get_plan_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().plan_all_json())
}

async fn get_plan(State(app): State<AppState>, Path(index): Path<String>) -> Json<Value> {
    match index.parse::<u16>() {
        Ok(index) => Json(app.store.read().plan_json(index)),
        Err(_) => empty(),
    }
}

async fn get_fence_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().fence_all_json())
}

async fn get_fence(State(app): State<AppState>, Path(index): Path<String>) -> Json<Value> {
    match index.parse::<u16>() {
        Ok(index) => Json(app.store.read().fence_json(index)),
        Err(_) => empty(),
    }
}

async fn get_rally_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().rally_all_json())
}

async fn get_rally(State(app): State<AppState>, Path(index): Path<String>) -> Json<Value> {
    match index.parse::<u16>() {
        Ok(index) => Json(app.store.read().rally_json(index)),
        Err(_) => empty(),
    }
}

async fn get_custom_all(State(app): State<AppState>) -> Json<Value> {
    Json(app.store.read().custom_all_json())
}

async fn get_custom(State(app): State<AppState>, Path(key): Path<String>) -> Json<Value> {
    Json(app.store.read().custom_json(&key))
}

async fn post_command_long(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.command_long(&body))
}

async fn post_command_int(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.command_int(&body))
}

async fn post_param_set(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.param_set(&body))
}

async fn post_plan(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.plan(&body))
}

async fn post_rally(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.rally(&body))
}

async fn post_fence(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.fence(&body))
}

async fn post_custom(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.custom(&body))
}

async fn post_custom_all(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.custom_all(&body))
}

async fn post_message(State(app): State<AppState>, body: Bytes) -> Json<CommandResponse> {
    Json(app.relay.message(&body))
}

async fn set_argument(
    State(app): State<AppState>,
    Path(argument): Path<String>,
    body: Bytes,
) -> Json<CommandResponse> {
    Json(app.relay.set_list(&argument, &body))
}
