//! Two-option prompt chooser

use super::{Transition, WidgetError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOption {
    pub title: String,
    pub prompt_text: String,
}

/// Immutable after creation; always exactly two candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptionsConfig {
    pub options: [PromptOption; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptionsState {
    #[serde(default)]
    pub selected_index: Option<usize>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub dismissed: bool,
}

impl PromptOptionsState {
    pub fn is_closed(&self) -> bool {
        self.completed || self.dismissed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptionsRecord {
    pub config: PromptOptionsConfig,
    #[serde(default)]
    pub state: PromptOptionsState,
}

impl PromptOptionsRecord {
    pub fn new(options: [PromptOption; 2]) -> Self {
        Self {
            config: PromptOptionsConfig { options },
            state: PromptOptionsState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOptionsEvent {
    Select(usize),
    Confirm,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOptionsEffect {
    None,
    /// Record the choice as a user turn and show the chosen prompt
    Confirmed { title: String, prompt_text: String },
}

/// Synthetic user turn recorded when an option is confirmed
pub fn choice_message(title: &str) -> String {
    format!("\"{title}\" 옵션을 선택했습니다.")
}

pub fn transition(
    record: &PromptOptionsRecord,
    event: PromptOptionsEvent,
) -> Result<Transition<PromptOptionsState, PromptOptionsEffect>, WidgetError> {
    if record.state.is_closed() {
        return Err(WidgetError::Closed);
    }

    let options = &record.config.options;
    let mut state = record.state.clone();

    let effect = match event {
        PromptOptionsEvent::Select(index) => {
            if index >= options.len() {
                return Err(WidgetError::OptionOutOfRange {
                    index,
                    len: options.len(),
                });
            }
            state.selected_index = Some(index);
            PromptOptionsEffect::None
        }
        PromptOptionsEvent::Confirm => {
            let index = state.selected_index.ok_or(WidgetError::NothingSelected)?;
            let chosen = options.get(index).ok_or(WidgetError::OptionOutOfRange {
                index,
                len: options.len(),
            })?;
            state.completed = true;
            state.dismissed = false;
            PromptOptionsEffect::Confirmed {
                title: chosen.title.clone(),
                prompt_text: chosen.prompt_text.clone(),
            }
        }
        PromptOptionsEvent::Dismiss => {
            state.dismissed = true;
            PromptOptionsEffect::None
        }
    };

    Ok(Transition { state, effect })
}
