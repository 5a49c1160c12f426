//! Survey widget: one question, answered by choosing options or typing

use super::{Transition, WidgetError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_SUBMIT_LABEL: &str = "응답 제출";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyKind {
    MultipleChoice,
    Input,
}

impl SurveyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SurveyKind::MultipleChoice => "multiple_choice",
            SurveyKind::Input => "input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyConfig {
    pub survey_id: String,
    #[serde(default)]
    pub title: String,
    pub prompt: String,
    pub kind: SurveyKind,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default = "default_submit_label")]
    pub submit_label: String,
}

fn default_required() -> bool {
    true
}

fn default_submit_label() -> String {
    DEFAULT_SUBMIT_LABEL.to_string()
}

impl SurveyConfig {
    /// A survey needs a question, and a choice survey needs something to choose
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.prompt.trim().is_empty() {
            return Err("설문 질문(prompt)이 비어 있습니다.");
        }
        if self.kind == SurveyKind::MultipleChoice && self.options.is_empty() {
            return Err("선택형 설문에는 최소 1개의 옵션이 필요합니다.");
        }
        Ok(())
    }
}

/// Frozen answers recorded on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurveyAnswers {
    MultipleChoice { selected_options: Vec<String> },
    Input { input_value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyState {
    #[serde(default)]
    pub selected_options: Vec<String>,
    #[serde(default)]
    pub input_value: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub dismissed: bool,
    #[serde(default)]
    pub answers: Option<SurveyAnswers>,
    #[serde(default)]
    pub submitted_at: Option<i64>,
}

impl SurveyState {
    pub fn is_closed(&self) -> bool {
        self.completed || self.dismissed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub config: SurveyConfig,
    #[serde(default)]
    pub state: SurveyState,
}

impl SurveyRecord {
    pub fn new(config: SurveyConfig) -> Self {
        Self {
            config,
            state: SurveyState::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyEvent {
    /// Replace the selection; a single-choice survey keeps only the last option
    SetSelection(Vec<String>),
    /// Click one option: toggles under multi-select, replaces otherwise
    Toggle(String),
    SetInput(String),
    Submit { at: i64 },
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyEffect {
    None,
    /// Send this text through the normal pipeline as if the user typed it
    Answered { message: String },
}

fn check_option(config: &SurveyConfig, option: &str) -> Result<(), WidgetError> {
    if config.options.iter().any(|o| o == option) {
        Ok(())
    } else {
        Err(WidgetError::UnknownOption(option.to_string()))
    }
}

fn require_kind(config: &SurveyConfig, kind: SurveyKind) -> Result<(), WidgetError> {
    if config.kind == kind {
        Ok(())
    } else {
        Err(WidgetError::WrongKind(config.kind.as_str()))
    }
}

pub fn transition(
    record: &SurveyRecord,
    event: SurveyEvent,
) -> Result<Transition<SurveyState, SurveyEffect>, WidgetError> {
    if record.state.is_closed() {
        return Err(WidgetError::Closed);
    }

    let config = &record.config;
    let mut state = record.state.clone();

    let effect = match event {
        SurveyEvent::SetSelection(mut options) => {
            require_kind(config, SurveyKind::MultipleChoice)?;
            for option in &options {
                check_option(config, option)?;
            }
            let mut seen = HashSet::new();
            options.retain(|o| seen.insert(o.clone()));
            if !config.allow_multiple && options.len() > 1 {
                options = options.split_off(options.len() - 1);
            }
            state.selected_options = options;
            SurveyEffect::None
        }
        SurveyEvent::Toggle(option) => {
            require_kind(config, SurveyKind::MultipleChoice)?;
            check_option(config, &option)?;
            if config.allow_multiple {
                if let Some(pos) = state.selected_options.iter().position(|o| *o == option) {
                    state.selected_options.remove(pos);
                } else {
                    state.selected_options.push(option);
                }
            } else {
                state.selected_options = vec![option];
            }
            SurveyEffect::None
        }
        SurveyEvent::SetInput(text) => {
            require_kind(config, SurveyKind::Input)?;
            state.input_value = text;
            SurveyEffect::None
        }
        SurveyEvent::Submit { at } => {
            let answers = match config.kind {
                SurveyKind::MultipleChoice => {
                    if config.required && state.selected_options.is_empty() {
                        return Err(WidgetError::AnswerRequired);
                    }
                    SurveyAnswers::MultipleChoice {
                        selected_options: state.selected_options.clone(),
                    }
                }
                SurveyKind::Input => {
                    let value = state.input_value.trim().to_string();
                    if config.required && value.is_empty() {
                        return Err(WidgetError::AnswerRequired);
                    }
                    SurveyAnswers::Input { input_value: value }
                }
            };
            let message = answer_message(config, &answers);
            state.completed = true;
            state.answers = Some(answers);
            state.submitted_at = Some(at);
            SurveyEffect::Answered { message }
        }
        SurveyEvent::Dismiss => {
            state.dismissed = true;
            SurveyEffect::None
        }
    };

    Ok(Transition { state, effect })
}

/// Markdown summary shown under a submitted survey
pub fn answer_summary(answers: &SurveyAnswers) -> String {
    match answers {
        SurveyAnswers::MultipleChoice { selected_options } => {
            if selected_options.is_empty() {
                return "선택한 옵션이 없습니다.".to_string();
            }
            let list = selected_options
                .iter()
                .map(|o| format!("- {o}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("**선택한 옵션**\n{list}")
        }
        SurveyAnswers::Input { input_value } => {
            if input_value.trim().is_empty() {
                return "입력한 응답이 없습니다.".to_string();
            }
            format!("**응답 내용**\n{input_value}")
        }
    }
}

/// Plain-text answer turn fed back into the conversation
pub fn answer_message(config: &SurveyConfig, answers: &SurveyAnswers) -> String {
    let header = if config.title.is_empty() {
        "[설문 응답]".to_string()
    } else {
        format!("[설문 응답 - {}]", config.title)
    };
    let prompt_line = if config.prompt.is_empty() {
        String::new()
    } else {
        format!("{}\n", config.prompt)
    };

    match answers {
        SurveyAnswers::MultipleChoice { selected_options } => {
            let selection = if selected_options.is_empty() {
                "선택 없음".to_string()
            } else {
                selected_options.join(", ")
            };
            format!("{header}\n{prompt_line}선택한 옵션: {selection}")
        }
        SurveyAnswers::Input { input_value } => {
            format!("{header}\n{prompt_line}응답 내용: {input_value}")
        }
    }
}
