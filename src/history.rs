//! Conversation history manager
//!
//! Owns the ordered turn sequence of one session. The stored sequence is a
//! faithful log; `for_model_submission` derives the view the model sees
//! without mutating it.

use crate::llm::{ContentBlock, LlmMessage, MessageRole};
use crate::message::{Message, MessageKind, Role};
use crate::widget::{self, Transition, WidgetError, WidgetRecord};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

#[cfg(test)]
mod proptests;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    turns: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Message>) -> Self {
        Self { turns }
    }

    /// Append a turn, stamping it with a timestamp strictly greater than
    /// every earlier one. Returns the timestamp, which addresses the turn.
    pub fn append(&mut self, mut turn: Message) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let floor = self.turns.last().map_or(i64::MIN, |t| t.timestamp.saturating_add(1));
        turn.timestamp = now.max(floor);
        let timestamp = turn.timestamp;
        self.turns.push(turn);
        timestamp
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn find(&self, timestamp: i64) -> Option<&Message> {
        self.turns.iter().find(|t| t.timestamp == timestamp)
    }

    /// Turns the model may see, in order.
    ///
    /// A tool turn survives only if the closest submittable turn before it
    /// is the tool-declaring assistant turn that declared its id, and no
    /// earlier tool turn already answered that id. Display-only turns are
    /// skipped and do not break the window. Declared calls without a result
    /// are left as they are.
    pub fn for_model_submission(&self) -> Vec<&Message> {
        let mut out = Vec::with_capacity(self.turns.len());
        let mut open: Option<HashSet<&str>> = None;

        for turn in &self.turns {
            if turn.is_display_only() {
                continue;
            }
            match &turn.kind {
                MessageKind::ToolCalls { calls, .. } => {
                    open = Some(calls.iter().map(|c| c.id.as_str()).collect());
                    out.push(turn);
                }
                MessageKind::ToolResult { tool_call_id, .. } => {
                    let answered = open
                        .as_mut()
                        .is_some_and(|ids| ids.remove(tool_call_id.as_str()));
                    if answered {
                        out.push(turn);
                    } else {
                        tracing::warn!(
                            tool_call_id = %tool_call_id,
                            timestamp = turn.timestamp,
                            "Dropping orphan tool result from model submission"
                        );
                    }
                }
                _ => {
                    open = None;
                    out.push(turn);
                }
            }
        }

        out
    }

    /// `for_model_submission` projected into provider-neutral messages
    pub fn model_messages(&self) -> Vec<LlmMessage> {
        self.for_model_submission()
            .into_iter()
            .filter_map(to_llm_message)
            .collect()
    }

    /// Read-modify-write on the widget record owned by the turn at
    /// `timestamp`: run the transition, then merge only the changed state
    /// fields over the stored state.
    pub fn update_widget<W, E>(
        &mut self,
        timestamp: i64,
        transition: impl FnOnce(&W) -> Result<Transition<W::State, E>, WidgetError>,
    ) -> Result<E, WidgetError>
    where
        W: WidgetRecord,
    {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.timestamp == timestamp)
            .ok_or(WidgetError::NotFound(timestamp))?;
        let found = turn.kind.name();
        let record = W::from_kind_mut(&mut turn.kind).ok_or(WidgetError::WrongKind(found))?;

        let Transition { state: next, effect } = transition(record)?;
        let patch = widget::diff_patch(record.state(), &next);
        *record.state_mut() = match widget::merge_patch(record.state(), &patch) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!(timestamp, error = %e, "Widget state merge failed, replacing state");
                next
            }
        };
        Ok(effect)
    }
}

impl Serialize for History {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.turns.serialize(serializer)
    }
}

/// Stored histories load leniently: unreadable turns are dropped
impl<'de> Deserialize<'de> for History {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::message::deserialize_lenient(deserializer).map(Self::from_turns)
    }
}

fn to_llm_message(turn: &Message) -> Option<LlmMessage> {
    match (&turn.role, &turn.kind) {
        (Role::User, MessageKind::Text { text }) => {
            let mut content = Vec::with_capacity(1 + turn.attachments.len());
            if !text.is_empty() {
                content.push(ContentBlock::text(text.clone()));
            }
            content.extend(turn.attachments.iter().map(|a| a.for_model_submission()));
            Some(LlmMessage {
                role: MessageRole::User,
                content,
            })
        }
        (Role::Assistant, MessageKind::Text { text }) => Some(LlmMessage::assistant_text(text.clone())),
        (Role::Assistant, MessageKind::ToolCalls { text, calls }) => {
            let mut content = Vec::with_capacity(calls.len() + 1);
            if let Some(text) = text.as_ref().filter(|t| !t.is_empty()) {
                content.push(ContentBlock::text(text.clone()));
            }
            content.extend(
                calls
                    .iter()
                    .map(|c| ContentBlock::tool_use(&c.id, &c.function_name, &c.raw_arguments)),
            );
            Some(LlmMessage {
                role: MessageRole::Assistant,
                content,
            })
        }
        (Role::Tool, MessageKind::ToolResult { tool_call_id, content }) => Some(LlmMessage {
            role: MessageRole::User,
            content: vec![ContentBlock::tool_result(tool_call_id, content)],
        }),
        _ => None,
    }
}
