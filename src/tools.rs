//! Tool catalogue for the prompt-engineering dialogue
//!
//! The model may call exactly the functions named by [`ToolCommand`]. Each
//! handler performs one side effect on the active conversation (most of them
//! materialize a display-only turn) and returns a small result object that is
//! recorded as the tool turn's content.

use crate::conversation::{Conversation, TargetService};
use crate::llm::ToolDefinition;
use crate::message::Message;
use crate::store::{DurableStore, StoreKey};
use crate::widget::{PromptOption, PromptOptionsRecord, SurveyConfig, SurveyKind, SurveyRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const SUGGEST_PROMPT_OPTIONS: &str = "suggest_prompt_options";
pub const UPDATE_PROMPT: &str = "update_prompt";
pub const FINALIZE_PROMPT: &str = "finalize_prompt";
pub const REQUEST_SURVEY: &str = "request_survey";
pub const REMEMBER_MEMORY: &str = "remember_memory";

/// Result object recorded for every dispatched call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub message: String,
}

impl ToolOutput {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Serialized form stored in the tool turn
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"success\":{},\"message\":\"\"}}", self.success)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OptionArg {
    pub title: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SuggestPromptOptionsArgs {
    pub options: Vec<OptionArg>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdatePromptArgs {
    pub updated_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FinalizePromptArgs {
    pub final_prompt: String,
    pub summary: String,
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequestSurveyArgs {
    pub survey_id: Option<String>,
    pub title: String,
    pub prompt: String,
    pub survey_type: Option<String>,
    pub options: Vec<String>,
    pub allow_multiple: bool,
    pub required: bool,
    pub placeholder: String,
    pub submit_label: Option<String>,
}

impl Default for RequestSurveyArgs {
    fn default() -> Self {
        Self {
            survey_id: None,
            title: String::new(),
            prompt: String::new(),
            survey_type: None,
            options: Vec::new(),
            allow_multiple: false,
            required: true,
            placeholder: String::new(),
            submit_label: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RememberMemoryArgs {
    pub note: String,
}

/// The closed set of callable functions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    SuggestPromptOptions(SuggestPromptOptionsArgs),
    UpdatePrompt(UpdatePromptArgs),
    FinalizePrompt(FinalizePromptArgs),
    RequestSurvey(RequestSurveyArgs),
    RememberMemory(RememberMemoryArgs),
}

impl ToolCommand {
    /// Resolve a declared call. Malformed arguments degrade to an empty
    /// argument object; only an unknown name is an error.
    pub fn parse(name: &str, raw_arguments: &str) -> Result<Self, ToolCallError> {
        let value = parse_arguments(name, raw_arguments);
        Ok(match name {
            SUGGEST_PROMPT_OPTIONS => Self::SuggestPromptOptions(typed_arguments(name, value)),
            UPDATE_PROMPT => Self::UpdatePrompt(typed_arguments(name, value)),
            FINALIZE_PROMPT => Self::FinalizePrompt(typed_arguments(name, value)),
            REQUEST_SURVEY => Self::RequestSurvey(typed_arguments(name, value)),
            REMEMBER_MEMORY => Self::RememberMemory(typed_arguments(name, value)),
            other => return Err(ToolCallError::UnknownFunction(other.to_string())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SuggestPromptOptions(_) => SUGGEST_PROMPT_OPTIONS,
            Self::UpdatePrompt(_) => UPDATE_PROMPT,
            Self::FinalizePrompt(_) => FINALIZE_PROMPT,
            Self::RequestSurvey(_) => REQUEST_SURVEY,
            Self::RememberMemory(_) => REMEMBER_MEMORY,
        }
    }

    pub fn run(self, ctx: &mut ToolContext<'_>) -> ToolOutput {
        match self {
            Self::SuggestPromptOptions(args) => suggest_prompt_options(args, ctx),
            Self::UpdatePrompt(args) => update_prompt(args, ctx),
            Self::FinalizePrompt(args) => finalize_prompt(args, ctx),
            Self::RequestSurvey(args) => request_survey(args, ctx),
            Self::RememberMemory(args) => remember_memory(args, ctx),
        }
    }
}

fn parse_arguments(name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            tracing::warn!(tool = name, "Tool arguments are not an object, using empty arguments");
            json!({})
        }
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "Malformed tool arguments, using empty arguments");
            json!({})
        }
    }
}

fn typed_arguments<T: DeserializeOwned + Default>(name: &str, value: Value) -> T {
    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(tool = name, error = %e, "Tool arguments have the wrong shape, using defaults");
        T::default()
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Everything a handler may touch
pub struct ToolContext<'a> {
    pub conversation: &'a mut Conversation,
    pub store: &'a DurableStore,
    pub user: &'a str,
    pub now_ms: i64,
}

fn suggest_prompt_options(args: SuggestPromptOptionsArgs, ctx: &mut ToolContext<'_>) -> ToolOutput {
    let mut options = args
        .options
        .into_iter()
        .filter(|o| !o.title.trim().is_empty() || !o.prompt.trim().is_empty())
        .map(|o| PromptOption {
            title: o.title,
            prompt_text: o.prompt,
        });
    let (Some(first), Some(second)) = (options.next(), options.next()) else {
        tracing::warn!("suggest_prompt_options called without two usable options");
        return ToolOutput::error("프롬프트 옵션은 정확히 2개가 필요합니다.");
    };
    if options.next().is_some() {
        tracing::warn!("suggest_prompt_options returned more than two options, keeping the first two");
    }

    ctx.conversation
        .messages
        .append(Message::prompt_options(PromptOptionsRecord::new([first, second])));
    ToolOutput::success("프롬프트 옵션을 사용자에게 표시했습니다.")
}

fn update_prompt(args: UpdatePromptArgs, ctx: &mut ToolContext<'_>) -> ToolOutput {
    ctx.conversation
        .messages
        .append(Message::prompt_update(args.updated_prompt));
    ToolOutput::success("프롬프트가 업데이트되었습니다.")
}

fn finalize_prompt(args: FinalizePromptArgs, ctx: &mut ToolContext<'_>) -> ToolOutput {
    let service = match args.service.as_deref() {
        Some(name) => TargetService::parse(name).unwrap_or_else(|| {
            tracing::warn!(service = name, "Unknown target service, using the conversation's");
            ctx.conversation.selected_service
        }),
        None => ctx.conversation.selected_service,
    };
    let link = service.deep_link(&args.final_prompt);
    ctx.conversation.messages.append(Message::final_prompt(
        args.final_prompt,
        args.summary,
        service.as_str().to_string(),
        link,
    ));
    ToolOutput::success("프롬프트가 최종 확정되었습니다.")
}

fn request_survey(args: RequestSurveyArgs, ctx: &mut ToolContext<'_>) -> ToolOutput {
    let kind = match args.survey_type.as_deref() {
        Some("input") => SurveyKind::Input,
        Some("multiple_choice") | None => SurveyKind::MultipleChoice,
        Some(other) => {
            tracing::warn!(survey_type = other, "Unknown survey type, using multiple_choice");
            SurveyKind::MultipleChoice
        }
    };
    let config = SurveyConfig {
        survey_id: args
            .survey_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("survey_{}", ctx.now_ms)),
        title: args.title,
        prompt: args.prompt,
        kind,
        options: args
            .options
            .into_iter()
            .filter(|o| !o.trim().is_empty())
            .collect(),
        allow_multiple: args.allow_multiple,
        required: args.required,
        placeholder: args.placeholder,
        submit_label: args
            .submit_label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| crate::widget::survey::DEFAULT_SUBMIT_LABEL.to_string()),
    };
    if let Err(reason) = config.validate() {
        tracing::warn!(survey_id = %config.survey_id, reason, "Rejected survey request");
        return ToolOutput::error(reason);
    }

    ctx.conversation
        .messages
        .append(Message::survey(SurveyRecord::new(config)));
    ToolOutput::success("설문을 사용자에게 표시했습니다.")
}

fn remember_memory(args: RememberMemoryArgs, ctx: &mut ToolContext<'_>) -> ToolOutput {
    let note = args.note.trim();
    if note.is_empty() {
        return ToolOutput::error("기억할 내용이 비어 있습니다.");
    }

    let key = StoreKey::MemoryNotes {
        user: ctx.user.to_string(),
    };
    let mut notes: Vec<String> = ctx.store.load(&key).unwrap_or_default();
    if notes.iter().any(|n| n == note) {
        return ToolOutput::success("이미 기억하고 있는 내용입니다.");
    }
    notes.push(note.to_string());
    if ctx.store.save(&key, &notes) {
        ToolOutput::success("메모를 기억했습니다.")
    } else {
        ToolOutput::error("메모를 저장하지 못했습니다.")
    }
}

// ============================================================================
// Catalogue
// ============================================================================

/// Function definitions sent with every tool-enabled model call
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SUGGEST_PROMPT_OPTIONS.to_string(),
            description: "사용자의 요구사항을 분석해 서로 다른 접근의 프롬프트 옵션 2개를 제안합니다."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "options": {
                        "type": "array",
                        "description": "제안할 프롬프트 옵션 (정확히 2개)",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": {"type": "string", "description": "옵션 제목"},
                                "prompt": {"type": "string", "description": "프롬프트 본문"}
                            },
                            "required": ["title", "prompt"]
                        },
                        "minItems": 2,
                        "maxItems": 2
                    }
                },
                "required": ["options"]
            }),
        },
        ToolDefinition {
            name: UPDATE_PROMPT.to_string(),
            description: "사용자의 피드백을 반영해 현재 프롬프트를 수정합니다.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "updated_prompt": {"type": "string", "description": "수정된 프롬프트 전문"}
                },
                "required": ["updated_prompt"]
            }),
        },
        ToolDefinition {
            name: FINALIZE_PROMPT.to_string(),
            description: "프롬프트를 최종 확정하고 대상 AI 서비스로 보낼 준비를 합니다.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "final_prompt": {"type": "string", "description": "최종 프롬프트"},
                    "summary": {"type": "string", "description": "프롬프트에 대한 짧은 설명"},
                    "service": {
                        "type": "string",
                        "enum": ["chatgpt", "claude", "gemini", "perplexity"],
                        "description": "프롬프트를 보낼 AI 서비스"
                    }
                },
                "required": ["final_prompt", "summary"]
            }),
        },
        ToolDefinition {
            name: REQUEST_SURVEY.to_string(),
            description: "추가 정보가 필요할 때 선택형 또는 입력형 설문을 사용자에게 보여줍니다."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "survey_id": {"type": "string", "description": "설문 식별자"},
                    "title": {"type": "string", "description": "설문 제목"},
                    "prompt": {"type": "string", "description": "사용자에게 보여줄 질문"},
                    "survey_type": {
                        "type": "string",
                        "enum": ["multiple_choice", "input"],
                        "description": "선택형 또는 입력형"
                    },
                    "options": {
                        "type": "array",
                        "items": {"type": "string"},
                        "minItems": 1,
                        "description": "선택형 설문의 옵션"
                    },
                    "allow_multiple": {"type": "boolean", "default": false},
                    "required": {"type": "boolean", "default": true},
                    "placeholder": {"type": "string", "description": "입력형 설문의 안내 문구"},
                    "submit_label": {"type": "string", "description": "제출 버튼 문구"}
                },
                "required": ["survey_id", "prompt", "survey_type"]
            }),
        },
        ToolDefinition {
            name: REMEMBER_MEMORY.to_string(),
            description: "다음 대화에서도 참고할 사용자 선호나 사실을 짧은 메모로 기억합니다."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "note": {"type": "string", "description": "기억할 한 줄 메모"}
                },
                "required": ["note"]
            }),
        },
    ]
}
