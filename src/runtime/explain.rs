//! Inline explanation of a highlighted passage
//!
//! Only the most recent request matters: each call takes a new id from a
//! monotonic counter, and a result whose id is no longer the latest is
//! discarded. This is the only cancellable model call.

use super::traits::LlmClient;
use crate::llm::{LlmError, LlmMessage, LlmRequest, SystemContent};
use crate::system_prompt::EXPLAIN_PROMPT;
use std::sync::atomic::{AtomicU64, Ordering};

const EXPLAIN_MAX_TOKENS: u32 = 400;

pub struct Explainer<L: LlmClient> {
    llm: L,
    latest: AtomicU64,
}

impl<L: LlmClient> Explainer<L> {
    pub fn new(llm: L) -> Self {
        Self {
            llm,
            latest: AtomicU64::new(0),
        }
    }

    /// Explain `selection`. `Ok(None)` means a newer request superseded this one.
    pub async fn explain(
        &self,
        selection: &str,
        api_key: Option<String>,
    ) -> Result<Option<String>, LlmError> {
        let request_id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let request = LlmRequest {
            system: vec![SystemContent::new(EXPLAIN_PROMPT)],
            messages: vec![LlmMessage::user_text(selection.trim())],
            tools: Vec::new(),
            max_tokens: Some(EXPLAIN_MAX_TOKENS),
            api_key,
        };
        let result = self.llm.complete(&request).await;

        if self.latest.load(Ordering::SeqCst) != request_id {
            tracing::debug!(request_id, "Discarding superseded explanation");
            return Ok(None);
        }
        result.map(|response| Some(response.text().trim().to_string()))
    }
}
