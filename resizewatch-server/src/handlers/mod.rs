pub mod events;
pub mod processing;

use axum::Json;
use serde_json::{Value, json};
use tracing::debug;

pub async fn ping_handler() -> Json<Value> {
    debug!("ping");
    Json(json!({
        "status": "ok",
        "message": "resizewatch is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
