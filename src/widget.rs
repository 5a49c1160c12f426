//! Interactive widget state machine
//!
//! Widgets are persisted sub-messages (a two-option prompt chooser and a
//! survey) that keep accepting user input after the request that created
//! them has finished. Transitions are pure functions of the record and an
//! event; persistence applies the resulting state as a shallow merge patch
//! onto the stored record, addressed by the owning message's timestamp.
//!
//! Lifecycle: `created -> (selecting | answering)* -> completed`, or
//! `created -> dismissed`. Both end states are absorbing.

pub mod prompt_options;
pub mod survey;
pub mod view;

pub use prompt_options::{
    PromptOption, PromptOptionsConfig, PromptOptionsEffect, PromptOptionsEvent,
    PromptOptionsRecord, PromptOptionsState,
};
pub use survey::{
    SurveyAnswers, SurveyConfig, SurveyEffect, SurveyEvent, SurveyKind, SurveyRecord, SurveyState,
};
pub use view::{project, WidgetView};

use crate::message::MessageKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidgetError {
    #[error("Widget is already completed or dismissed")]
    Closed,
    #[error("Option index {index} is out of range (0..{len})")]
    OptionOutOfRange { index: usize, len: usize },
    #[error("No option has been selected")]
    NothingSelected,
    #[error("An answer is required before submitting")]
    AnswerRequired,
    #[error("Unknown survey option: {0}")]
    UnknownOption(String),
    #[error("Event does not apply to a {0} widget")]
    WrongKind(&'static str),
    #[error("No widget at timestamp {0}")]
    NotFound(i64),
}

/// Result of a pure transition: the next state plus what the caller must do
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S, E> {
    pub state: S,
    pub effect: E,
}

/// A widget record embedded in a message, with its mutable state
pub trait WidgetRecord {
    type State: Serialize + DeserializeOwned;

    fn from_kind_mut(kind: &mut MessageKind) -> Option<&mut Self>;
    fn state(&self) -> &Self::State;
    fn state_mut(&mut self) -> &mut Self::State;
}

impl WidgetRecord for PromptOptionsRecord {
    type State = PromptOptionsState;

    fn from_kind_mut(kind: &mut MessageKind) -> Option<&mut Self> {
        match kind {
            MessageKind::PromptOptions(record) => Some(record),
            _ => None,
        }
    }

    fn state(&self) -> &Self::State {
        &self.state
    }

    fn state_mut(&mut self) -> &mut Self::State {
        &mut self.state
    }
}

impl WidgetRecord for SurveyRecord {
    type State = SurveyState;

    fn from_kind_mut(kind: &mut MessageKind) -> Option<&mut Self> {
        match kind {
            MessageKind::Survey(record) => Some(record),
            _ => None,
        }
    }

    fn state(&self) -> &Self::State {
        &self.state
    }

    fn state_mut(&mut self) -> &mut Self::State {
        &mut self.state
    }
}

/// Fields of `next` that differ from `prev`, as a JSON object
pub fn diff_patch<S: Serialize>(prev: &S, next: &S) -> Map<String, Value> {
    let (Ok(Value::Object(prev)), Ok(Value::Object(next))) =
        (serde_json::to_value(prev), serde_json::to_value(next))
    else {
        return Map::new();
    };

    next.into_iter()
        .filter(|(key, value)| prev.get(key) != Some(value))
        .collect()
}

/// `{...old, ...patch}` on a typed value
pub fn merge_patch<S>(old: &S, patch: &Map<String, Value>) -> Result<S, serde_json::Error>
where
    S: Serialize + DeserializeOwned,
{
    let mut merged = match serde_json::to_value(old)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(merged))
}
