use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection_manager::{ConnectionLimits, ConnectionManager};
use crate::relay::RelayDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<RelayDispatcher>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let limits = ConnectionLimits {
            max_connections: settings.websocket.max_connections,
        };
        let connection_manager = Arc::new(ConnectionManager::with_limits(limits));
        let dispatcher = Arc::new(RelayDispatcher::new(connection_manager.clone()));

        Self {
            settings: Arc::new(settings),
            connection_manager,
            dispatcher,
            started_at: Instant::now(),
        }
    }
}
