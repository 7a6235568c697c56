use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    events::processing_events_sse_handler,
    ping_handler,
    processing::{
        get_status_handler, initial_processing_handler, set_folders_handler,
        set_resize_options_handler, start_processing_handler, stop_processing_handler,
    },
};
use crate::infra::app_state::AppState;

/// Remote-call surface used by the UI.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/set_folders", post(set_folders_handler))
        .route("/set_resize_options", post(set_resize_options_handler))
        .route("/initial_processing", post(initial_processing_handler))
        .route("/start_processing", post(start_processing_handler))
        .route("/stop_processing", post(stop_processing_handler))
        .route("/get_status", get(get_status_handler))
        .route("/events", get(processing_events_sse_handler))
}

/// Full application: API, health ping and middleware.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .nest("/api", create_api_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
