use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    response::Json,
    routing::{get, post},
};
use chrono::Utc;
use hnpulse_core::api::routes;
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    handlers::{adhoc, refresh},
    infra::{app_state::AppState, config::Config},
};

pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route(routes::STATUS, get(refresh::refresh_status_handler))
        .route(routes::refresh::TRIGGER, post(refresh::trigger_refresh_handler))
        .route(routes::refresh::STREAM, get(refresh::refresh_stream_handler))
        .route(
            routes::adhoc::SUMMARIZE_SINGLE,
            post(adhoc::summarize_single_handler),
        )
        .route(routes::adhoc::STATUS, get(adhoc::adhoc_status_handler))
}

pub fn create_app(state: AppState) -> Router {
    let cors_layer = cors_layer(&state.config);

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .merge(create_api_router());

    if let Some(dir) = &state.config.storage.static_dir {
        app = app.fallback_service(
            ServeDir::new(dir).append_index_html_on_directories(true),
        );
    }

    app.layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.dev_mode {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
