//! Render projection for widgets
//!
//! Turns a stored record into what the front-end draws. Dismissed widgets
//! and surveys whose config cannot be shown project to nothing.

use super::survey::answer_summary;
use super::{PromptOptionsRecord, SurveyKind, SurveyRecord};
use crate::message::{Message, MessageKind};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub title: String,
    pub prompt_text: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyOptionView {
    pub label: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum WidgetView {
    PromptOptions {
        timestamp: i64,
        options: Vec<OptionView>,
        selected_index: Option<usize>,
        completed: bool,
        /// Confirm/cancel buttons visible
        actions_enabled: bool,
        status: Option<String>,
    },
    Survey {
        timestamp: i64,
        survey_id: String,
        title: String,
        prompt: String,
        kind: SurveyKind,
        /// "checkbox" or "radio"
        input_type: &'static str,
        options: Vec<SurveyOptionView>,
        input_value: String,
        placeholder: String,
        submit_label: String,
        controls_enabled: bool,
        summary: Option<String>,
        status: Option<String>,
    },
}

pub fn project(message: &Message) -> Option<WidgetView> {
    match &message.kind {
        MessageKind::PromptOptions(record) => project_prompt_options(message.timestamp, record),
        MessageKind::Survey(record) => project_survey(message.timestamp, record),
        _ => None,
    }
}

fn project_prompt_options(timestamp: i64, record: &PromptOptionsRecord) -> Option<WidgetView> {
    let state = &record.state;
    if state.dismissed {
        return None;
    }

    let options = record
        .config
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| OptionView {
            title: o.title.clone(),
            prompt_text: o.prompt_text.clone(),
            selected: state.selected_index == Some(i),
        })
        .collect();

    Some(WidgetView::PromptOptions {
        timestamp,
        options,
        selected_index: state.selected_index,
        completed: state.completed,
        actions_enabled: !state.completed,
        status: state.completed.then(|| "선택이 완료되었습니다.".to_string()),
    })
}

fn project_survey(timestamp: i64, record: &SurveyRecord) -> Option<WidgetView> {
    let config = &record.config;
    let state = &record.state;
    if state.dismissed {
        return None;
    }
    if let Err(reason) = config.validate() {
        tracing::warn!(timestamp, reason, "Survey cannot be rendered");
        return None;
    }

    let options = config
        .options
        .iter()
        .map(|label| SurveyOptionView {
            label: label.clone(),
            checked: state.selected_options.contains(label),
        })
        .collect();

    Some(WidgetView::Survey {
        timestamp,
        survey_id: config.survey_id.clone(),
        title: config.title.clone(),
        prompt: config.prompt.clone(),
        kind: config.kind,
        input_type: if config.allow_multiple { "checkbox" } else { "radio" },
        options,
        input_value: state.input_value.clone(),
        placeholder: config.placeholder.clone(),
        submit_label: config.submit_label.clone(),
        controls_enabled: !state.completed,
        summary: state.answers.as_ref().map(answer_summary),
        status: state.completed.then(|| "응답이 제출되었습니다.".to_string()),
    })
}
