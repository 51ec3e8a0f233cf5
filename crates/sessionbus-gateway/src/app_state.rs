//! Shared application state for the session bus gateway.

use std::sync::Arc;

use sessionbus_core::error::Result;

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::services::EchoService;
use crate::sessions::{SessionDefaults, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    sessions: SessionRegistry,
}

impl AppState {
    /// Build application state and register the built-in services.
    pub fn new(cfg: GatewayConfig) -> Result<Self> {
        cfg.validate()?;

        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register(Arc::new(EchoService));
        tracing::info!(handlers = ?dispatcher.registered_types(), "request handlers registered");

        let sessions = SessionRegistry::new(
            dispatcher,
            SessionDefaults {
                debug: cfg.hub.debug,
                replay_backlog: cfg.hub.replay_backlog,
                rpc_timeout: cfg.rpc.timeout(),
            },
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                sessions,
            }),
        })
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }
}
