//! API request and response types

use crate::attachment::{Attachment, IncomingFile};
use crate::conversation::{Conversation, ConversationSummary, TargetService};
use crate::message::Message;
use crate::remote::RemoteRef;
use crate::widget::{project, PromptOptionsEvent, SurveyEvent, WidgetView};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<UploadedFile>,
    #[serde(default)]
    pub remote: Vec<RemoteRef>,
}

/// File upload; `data` is base64, optionally as a data URL
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub data: String,
}

impl UploadedFile {
    pub fn decode(self) -> Result<IncomingFile, String> {
        let (declared, encoded) = match self.data.strip_prefix("data:") {
            Some(rest) => {
                let (header, body) = rest
                    .split_once(',')
                    .ok_or_else(|| format!("{}: malformed data URL", self.name))?;
                let mime = header.strip_suffix(";base64").unwrap_or(header);
                (Some(mime.to_string()).filter(|m| !m.is_empty()), body)
            }
            None => (None, self.data.as_str()),
        };
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("{}: invalid base64 ({e})", self.name))?;
        Ok(IncomingFile {
            mime_type: self.mime_type.clone().or(declared),
            name: self.name,
            bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PromptOptionsEventRequest {
    Select { index: usize },
    Confirm,
    Dismiss,
}

impl From<PromptOptionsEventRequest> for PromptOptionsEvent {
    fn from(req: PromptOptionsEventRequest) -> Self {
        match req {
            PromptOptionsEventRequest::Select { index } => PromptOptionsEvent::Select(index),
            PromptOptionsEventRequest::Confirm => PromptOptionsEvent::Confirm,
            PromptOptionsEventRequest::Dismiss => PromptOptionsEvent::Dismiss,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SurveyEventRequest {
    SetSelection { options: Vec<String> },
    Toggle { option: String },
    SetInput { text: String },
    Submit,
    Dismiss,
}

impl SurveyEventRequest {
    pub fn into_event(self, now_ms: i64) -> SurveyEvent {
        match self {
            Self::SetSelection { options } => SurveyEvent::SetSelection(options),
            Self::Toggle { option } => SurveyEvent::Toggle(option),
            Self::SetInput { text } => SurveyEvent::SetInput(text),
            Self::Submit => SurveyEvent::Submit { at: now_ms },
            Self::Dismiss => SurveyEvent::Dismiss,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub selection: String,
}

#[derive(Debug, Serialize)]
pub struct ExplainResponse {
    pub explanation: Option<String>,
    /// A newer explanation request replaced this one
    pub superseded: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoteTokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    pub service: TargetService,
}

/// Response with a list of conversations
#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
    pub active_id: Option<String>,
}

/// One turn as the front-end draws it: payloads are fetched separately
#[derive(Debug, Serialize)]
pub struct TurnView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetView>,
}

impl TurnView {
    pub fn new(message: &Message) -> Self {
        let mut message = message.clone();
        for attachment in &mut message.attachments {
            attachment.payload = None;
        }
        Self {
            widget: project(&message),
            message,
        }
    }
}

/// Response with conversation and its turns
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub selected_service: TargetService,
    pub messages: Vec<TurnView>,
    pub warnings: Vec<String>,
}

impl ConversationResponse {
    pub fn new(conversation: &Conversation, warnings: Vec<String>) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            selected_service: conversation.selected_service,
            messages: conversation
                .messages
                .snapshot()
                .iter()
                .map(TurnView::new)
                .collect(),
            warnings,
        }
    }
}

/// Response for settings actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub attachment: Attachment,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
