//! HTTP API for the prompt-crafting assistant

mod handlers;
mod types;

pub use handlers::create_router;

use crate::runtime::{Explainer, LlmClient, ProductionController};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Locks its own session state, so handlers share it directly
    pub controller: Arc<ProductionController>,
    pub explainer: Arc<Explainer<Arc<dyn LlmClient>>>,
}

impl AppState {
    pub fn new(controller: ProductionController, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            controller: Arc::new(controller),
            explainer: Arc::new(Explainer::new(llm)),
        }
    }
}
