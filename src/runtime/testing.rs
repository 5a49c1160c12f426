//! Mock implementations for testing
//!
//! These mocks let the controller run end-to-end without real I/O.

use super::traits::LlmClient;
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse};
use crate::remote::{RemoteError, RemoteFile, RemoteRef, RemoteSource};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Response builders
// ============================================================================

pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::text(text)],
        end_turn: true,
        ..Default::default()
    }
}

/// A response carrying `(id, name, raw_arguments)` tool calls in order
pub fn tool_response(calls: &[(&str, &str, &str)]) -> LlmResponse {
    LlmResponse {
        content: calls
            .iter()
            .map(|(id, name, args)| ContentBlock::tool_use(*id, *name, *args))
            .collect(),
        end_turn: false,
        ..Default::default()
    }
}

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock model client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next(request)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Delayed Mock LLM Client (for supersession testing)
// ============================================================================

/// Mock model client that sleeps before answering
pub struct DelayedMockLlmClient {
    inner: MockLlmClient,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlmClient {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockLlmClient::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.inner.queue_response(response);
    }
}

#[async_trait]
impl LlmClient for DelayedMockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        // Taken before sleeping so responses follow request order
        let response = self.inner.next(request);
        self.request_started.notify_waiters();
        tokio::time::sleep(self.delay).await;
        response
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Mock Remote Source
// ============================================================================

/// Remote source serving files from memory, keyed by path
#[derive(Default)]
pub struct MockRemoteSource {
    files: Mutex<HashMap<String, Vec<u8>>>,
    archive: Mutex<Option<Result<Vec<u8>, RemoteError>>>,
    /// Tokens passed to `fetch_archive`
    pub archive_tokens: Mutex<Vec<Option<String>>>,
}

impl MockRemoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, bytes: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        self
    }

    pub fn with_archive(self, archive: Result<Vec<u8>, RemoteError>) -> Self {
        *self.archive.lock().unwrap() = Some(archive);
        self
    }
}

#[async_trait]
impl RemoteSource for MockRemoteSource {
    async fn fetch_file(&self, reference: &RemoteRef) -> Result<RemoteFile, RemoteError> {
        let url = format!(
            "mock://{}/{}/{}/{}",
            reference.owner, reference.repo, reference.branch, reference.path
        );
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(&reference.path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(url.clone()))?;
        Ok(RemoteFile {
            name: reference.file_name().to_string(),
            mime_type: None,
            bytes,
            url,
        })
    }

    async fn fetch_archive(
        &self,
        reference: &RemoteRef,
        token: Option<&str>,
    ) -> Result<RemoteFile, RemoteError> {
        self.archive_tokens
            .lock()
            .unwrap()
            .push(token.map(str::to_string));
        if token.is_none() {
            return Err(RemoteError::MissingToken);
        }
        let bytes = self
            .archive
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(RemoteError::NotFound(reference.repo.clone())))?;
        Ok(RemoteFile {
            name: format!("{}-{}.zip", reference.repo, reference.branch),
            mime_type: Some("application/zip".into()),
            bytes,
            url: format!("mock://{}/{}/archive", reference.owner, reference.repo),
        })
    }
}
