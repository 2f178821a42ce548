//! The narrow administrative surface an out-of-process CLI or web UI would
//! bind to. This crate defines and exercises it; it does not ship that
//! CLI/UI.

use std::sync::Arc;

use mqtt_core::Will;

use crate::{
    router::Router,
    session::{SessionManager, SessionSummary},
};

pub struct AdminSurface {
    sessions: Arc<SessionManager>,
    router: Arc<Router>,
}

impl AdminSurface {
    pub fn new(sessions: Arc<SessionManager>, router: Arc<Router>) -> Self {
        Self { sessions, router }
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list_sessions().await
    }

    pub async fn terminate_session(&self, client_id: &str) -> Option<Will> {
        self.sessions.terminate_session(client_id).await
    }

    pub async fn publish_on_behalf(&self, topic: &str, payload: &str, retain: bool) {
        self.router.publish_on_behalf(topic, payload, retain).await;
    }
}
