//! Application state shared by the HTTP handlers.

use crate::engine::ReconciliationEngine;
use keygate_web::handlers::health::ProbeFuture;
use keygate_web::{AdminCredentials, ReadinessProbe};
use std::sync::Arc;

/// Application state, cloned (cheaply via `Arc`) for each request.
#[derive(Clone)]
pub struct AppState {
    /// The reconciliation engine and the services behind it
    pub engine: Arc<ReconciliationEngine>,
    admin_token: Arc<str>,
}

impl AppState {
    /// Create the state. An empty `admin_token` disables the admin routes.
    #[must_use]
    pub fn new(engine: Arc<ReconciliationEngine>, admin_token: &str) -> Self {
        Self {
            engine,
            admin_token: Arc::from(admin_token),
        }
    }
}

impl AdminCredentials for AppState {
    fn admin_token(&self) -> &str {
        &self.admin_token
    }
}

impl ReadinessProbe for AppState {
    fn check_ready(&self) -> ProbeFuture<'_> {
        Box::pin(async move {
            self.engine
                .capacity_snapshot()
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }
}
