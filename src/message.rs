//! Message envelope model
//!
//! One conversation turn. The payload is a tagged union with one schema per
//! kind; stored sessions are validated per message on load, and anything
//! unknown or corrupt is dropped instead of failing the whole session.

use crate::attachment::Attachment;
use crate::widget::{PromptOptionsRecord, SurveyRecord};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A model-declared function call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub raw_arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Text {
        text: String,
    },
    /// Assistant turn declaring tool calls
    ToolCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
    PromptOptions(PromptOptionsRecord),
    Survey(SurveyRecord),
    /// "현재 프롬프트" card
    PromptUpdate {
        prompt: String,
    },
    FinalPrompt {
        prompt: String,
        summary: String,
        service: String,
        link: String,
    },
    /// Visible failure notice; never sent to the model
    Error {
        message: String,
    },
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Text { .. } => "text",
            MessageKind::ToolCalls { .. } => "tool_calls",
            MessageKind::ToolResult { .. } => "tool_result",
            MessageKind::PromptOptions(_) => "prompt_options",
            MessageKind::Survey(_) => "survey",
            MessageKind::PromptUpdate { .. } => "prompt_update",
            MessageKind::FinalPrompt { .. } => "final_prompt",
            MessageKind::Error { .. } => "error",
        }
    }

    /// Role this kind is allowed to carry
    fn expected_role(&self) -> Option<Role> {
        match self {
            MessageKind::Text { .. } => None,
            MessageKind::ToolResult { .. } => Some(Role::Tool),
            _ => Some(Role::Assistant),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Milliseconds since epoch; unique within a session and used as the
    /// address of widget records
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    fn new(role: Role, kind: MessageKind) -> Self {
        Self {
            role,
            kind,
            attachments: Vec::new(),
            timestamp: 0,
        }
    }

    pub fn user_text(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::new(Role::User, MessageKind::Text { text: text.into() })
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageKind::Text { text: text.into() })
    }

    pub fn tool_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self::new(Role::Assistant, MessageKind::ToolCalls { text, calls })
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            Role::Tool,
            MessageKind::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
            },
        )
    }

    pub fn prompt_options(record: PromptOptionsRecord) -> Self {
        Self::new(Role::Assistant, MessageKind::PromptOptions(record))
    }

    pub fn survey(record: SurveyRecord) -> Self {
        Self::new(Role::Assistant, MessageKind::Survey(record))
    }

    pub fn prompt_update(prompt: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            MessageKind::PromptUpdate {
                prompt: prompt.into(),
            },
        )
    }

    pub fn final_prompt(prompt: String, summary: String, service: String, link: String) -> Self {
        Self::new(
            Role::Assistant,
            MessageKind::FinalPrompt {
                prompt,
                summary,
                service,
                link,
            },
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            MessageKind::Error {
                message: message.into(),
            },
        )
    }

    /// Role and kind agree; text turns may be user or assistant only
    pub fn is_consistent(&self) -> bool {
        match self.kind.expected_role() {
            Some(role) => role == self.role,
            None => self.role != Role::Tool,
        }
    }

    /// Widget turns and notices are shown to the user but never submitted
    pub fn is_display_only(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::PromptOptions(_)
                | MessageKind::Survey(_)
                | MessageKind::PromptUpdate { .. }
                | MessageKind::FinalPrompt { .. }
                | MessageKind::Error { .. }
        )
    }
}

/// Deserialize a message list, dropping entries that fail validation
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(parse_lenient(raw))
}

pub fn parse_lenient(raw: Vec<Value>) -> Vec<Message> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Message>(value) {
            Ok(message) if message.is_consistent() => Some(message),
            Ok(message) => {
                tracing::warn!(
                    index,
                    role = ?message.role,
                    kind = message.kind.name(),
                    "Dropping stored message with mismatched role"
                );
                None
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Dropping unreadable stored message");
                None
            }
        })
        .collect()
}
