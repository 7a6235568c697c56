//! # Resizewatch Server
//!
//! HTTP control surface for [`resizewatch_core`]: configure folders and a
//! resize policy, run the initial pass, start and stop watching, poll status
//! and follow results over server-sent events.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
