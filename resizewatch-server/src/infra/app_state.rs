use std::fmt;
use std::sync::Arc;

use resizewatch_core::SessionController;
use tokio_util::sync::CancellationToken;

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub controller: SessionController,
    /// Cancelled when the server begins shutting down; ends open event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let controller = SessionController::new(config.engine.clone());
        Self {
            config: Arc::new(config),
            controller,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("bind", &self.config.server.bind_address())
            .field("state", &self.controller.state())
            .finish_non_exhaustive()
    }
}
