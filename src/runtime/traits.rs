//! Trait abstractions for controller I/O
//!
//! These traits let the controller run against mock implementations.

use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::remote::{RemoteError, RemoteFile, RemoteRef, RemoteSource};
use async_trait::async_trait;
use std::sync::Arc;

/// Client for making model requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a model request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: RemoteSource + ?Sized> RemoteSource for Arc<T> {
    async fn fetch_file(&self, reference: &RemoteRef) -> Result<RemoteFile, RemoteError> {
        (**self).fetch_file(reference).await
    }

    async fn fetch_archive(
        &self,
        reference: &RemoteRef,
        token: Option<&str>,
    ) -> Result<RemoteFile, RemoteError> {
        (**self).fetch_archive(reference, token).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use a model service as `LlmClient`
pub struct ServiceLlmClient {
    service: Arc<dyn LlmService>,
}

impl ServiceLlmClient {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl LlmClient for ServiceLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.service.complete(request).await
    }

    fn model_id(&self) -> &str {
        self.service.model_id()
    }
}
