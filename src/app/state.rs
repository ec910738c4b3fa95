//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::policy::Decider;
use crate::ws::registry::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Decision source handle injected into every session
    pub decider: Arc<Decider>,
    pub sessions: Arc<SessionRegistry>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Build state, loading the learned policy once if configured
    pub fn new(config: Config) -> Self {
        let decider = Decider::load(config.model_path.as_deref(), config.decision_timeout);
        Self::with_decider(config, decider)
    }

    pub fn with_decider(config: Config, decider: Decider) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            decider: Arc::new(decider),
            sessions: Arc::new(SessionRegistry::new()),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Receiver that flips to `true` when the server begins shutting down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tell every open session to close
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
