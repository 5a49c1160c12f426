//! Property-based tests for the model-submission filter

use super::History;
use crate::message::{Message, MessageKind, ToolCall};
use proptest::prelude::*;
use std::collections::HashSet;

// ============================================================================
// Strategies
// ============================================================================

/// Small id pool so declarations and results collide often
fn arb_id() -> impl Strategy<Value = String> {
    (0u8..5).prop_map(|n| format!("call_{n}"))
}

fn arb_turn() -> impl Strategy<Value = Message> {
    prop_oneof![
        2 => "[a-z ]{1,20}".prop_map(|t| Message::user_text(t, Vec::new())),
        1 => "[a-z ]{1,20}".prop_map(Message::assistant_text),
        2 => prop::collection::vec(arb_id(), 1..4).prop_map(|ids| {
            let calls = ids
                .into_iter()
                .map(|id| ToolCall {
                    id,
                    function_name: "update_prompt".into(),
                    raw_arguments: "{}".into(),
                })
                .collect();
            Message::tool_calls(None, calls)
        }),
        4 => arb_id().prop_map(|id| Message::tool_result(id, "{\"success\":true}")),
        1 => Just(Message::prompt_update("p")),
        1 => Just(Message::error("e")),
    ]
}

fn arb_history() -> impl Strategy<Value = History> {
    prop::collection::vec(arb_turn(), 0..30).prop_map(|turns| {
        let mut h = History::new();
        for t in turns {
            h.append(t);
        }
        h
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn every_tool_turn_is_declared_by_nearest_declaring_turn(h in arb_history()) {
        let submitted = h.for_model_submission();
        let mut open: Option<HashSet<String>> = None;
        for turn in submitted {
            match &turn.kind {
                MessageKind::ToolCalls { calls, .. } => {
                    open = Some(calls.iter().map(|c| c.id.clone()).collect());
                }
                MessageKind::ToolResult { tool_call_id, .. } => {
                    let ids = open.as_mut();
                    prop_assert!(ids.is_some(), "tool turn without a preceding declaration");
                    prop_assert!(
                        ids.is_some_and(|ids| ids.remove(tool_call_id)),
                        "tool turn {} undeclared or answered twice", tool_call_id
                    );
                }
                _ => open = None,
            }
        }
    }

    #[test]
    fn filter_never_mutates_and_keeps_order(h in arb_history()) {
        let before = h.clone();
        let submitted: Vec<i64> = h.for_model_submission().iter().map(|m| m.timestamp).collect();
        prop_assert_eq!(&h, &before);

        let mut sorted = submitted.clone();
        sorted.sort_unstable();
        prop_assert_eq!(&submitted, &sorted);
        prop_assert!(submitted.len() <= h.len());
    }

    #[test]
    fn non_tool_submittable_turns_are_all_kept(h in arb_history()) {
        let expected = h
            .snapshot()
            .iter()
            .filter(|m| !m.is_display_only() && !matches!(m.kind, MessageKind::ToolResult { .. }))
            .count();
        let kept = h
            .for_model_submission()
            .iter()
            .filter(|m| !matches!(m.kind, MessageKind::ToolResult { .. }))
            .count();
        prop_assert_eq!(kept, expected);
    }
}
