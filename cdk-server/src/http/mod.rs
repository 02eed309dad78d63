// File: cdk-server/src/http/mod.rs

pub mod extract;
pub mod handlers;
pub mod response;
pub mod routes;

use std::sync::Arc;

use cdk_core::services::CdkService;

pub use routes::create_router;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CdkService>,
    /// Whether `X-Forwarded-For` names the client. Off unless a trusted
    /// proxy sits in front; otherwise the socket peer is used.
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(service: Arc<CdkService>) -> Self {
        Self {
            service,
            trust_forwarded_for: false,
        }
    }

    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}
