use std::sync::Arc;

use lib_ranking::core::{HubHandle, LeaderboardService};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LeaderboardService>,
    pub hub: HubHandle,
}
