//! Control calls: configure folders and policy, run the initial pass, start
//! and stop watching, poll status.

use std::path::PathBuf;

use axum::{Json, extract::State};
use resizewatch_core::{
    ProcessingResult, ResizePolicy, SessionState, SessionStatus, StartOutcome, StopOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::infra::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetFoldersRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct SetFoldersResponse {
    pub success: bool,
    pub message: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

pub async fn set_folders_handler(
    State(state): State<AppState>,
    Json(request): Json<SetFoldersRequest>,
) -> AppResult<Json<SetFoldersResponse>> {
    let folders = state
        .controller()
        .set_folders(&request.source, &request.destination)?;
    Ok(Json(SetFoldersResponse {
        success: true,
        message: "Folders set successfully".to_string(),
        source: folders.source().to_path_buf(),
        destination: folders.destination().to_path_buf(),
    }))
}

/// A target resolution wins when both are supplied.
#[derive(Debug, Default, Deserialize)]
pub struct ResizeOptionsRequest {
    #[serde(default, alias = "scaling_factor")]
    pub scale_factor: Option<f64>,
    #[serde(default, alias = "single_side_resolution")]
    pub target_resolution: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ResizeOptionsResponse {
    pub success: bool,
    pub message: String,
    pub policy: ResizePolicy,
}

pub async fn set_resize_options_handler(
    State(state): State<AppState>,
    Json(request): Json<ResizeOptionsRequest>,
) -> AppResult<Json<ResizeOptionsResponse>> {
    let policy = ResizePolicy::from_options(request.scale_factor, request.target_resolution)?;
    state.controller().set_resize_options(policy)?;
    Ok(Json(ResizeOptionsResponse {
        success: true,
        message: format!("Resize options set: {policy}"),
        policy,
    }))
}

#[derive(Debug, Serialize)]
pub struct InitialProcessingResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<ProcessingResult>,
    /// Files still being written during the pass; the watcher picks them up.
    pub deferred: Vec<String>,
}

pub async fn initial_processing_handler(
    State(state): State<AppState>,
) -> AppResult<Json<InitialProcessingResponse>> {
    let report = state.controller().initial_processing().await?;
    let failed = report.results.iter().filter(|r| !r.success).count();
    Ok(Json(InitialProcessingResponse {
        success: true,
        message: format!(
            "Processed {} file(s), {failed} failed",
            report.results.len()
        ),
        results: report.results,
        deferred: report.deferred,
    }))
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

pub async fn start_processing_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ControlResponse>> {
    let outcome = state.controller().start_processing().await?;
    let current = state.controller().state();
    let response = match outcome {
        StartOutcome::Started(session_id) => ControlResponse {
            success: true,
            message: "Processing started".to_string(),
            state: current,
            session_id: Some(session_id),
        },
        StartOutcome::AlreadyWatching => ControlResponse {
            success: false,
            message: "Processing is already running".to_string(),
            state: current,
            session_id: state.controller().get_status().session_id,
        },
    };
    Ok(Json(response))
}

pub async fn stop_processing_handler(State(state): State<AppState>) -> Json<ControlResponse> {
    let response = match state.controller().stop_processing().await {
        StopOutcome::Stopped => {
            info!("processing stopped by request");
            ControlResponse {
                success: true,
                message: "Processing stopped".to_string(),
                state: SessionState::Stopped,
                session_id: None,
            }
        }
        StopOutcome::NotWatching(found) => ControlResponse {
            success: false,
            message: format!("Processing is not running ({found})"),
            state: found,
            session_id: None,
        },
    };
    Json(response)
}

pub async fn get_status_handler(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.controller().get_status())
}
