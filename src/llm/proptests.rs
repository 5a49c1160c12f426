//! Property-based tests for the chat-completions translation layer
//!
//! These tests verify that the translation between our internal types
//! and the wire format preserves key invariants:
//! - Message translation never produces empty output
//! - Tool results become one `tool` message each, ids and order intact
//! - Raw tool-call arguments survive normalization byte for byte
//! - Tool calls with empty names are dropped

#![allow(clippy::redundant_closure_for_method_calls)]

use super::openai::{normalize_response, translate_message, OpenAIResponse};
use super::types::{ContentBlock, ImageSource, LlmMessage, MessageRole};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

fn arb_text_block() -> impl Strategy<Value = ContentBlock> {
    "[a-zA-Z0-9 _.!?,가-힣]{1,100}".prop_map(|text| ContentBlock::Text { text })
}

fn arb_image_block() -> impl Strategy<Value = ContentBlock> {
    (
        prop_oneof![Just("image/png"), Just("image/jpeg")],
        "[a-zA-Z0-9+/]{10,50}",
    )
        .prop_map(|(mime, data)| ContentBlock::Image {
            source: ImageSource::Url {
                url: format!("data:{mime};base64,{data}"),
            },
        })
}

/// Arguments may be anything the model emits, including broken JSON
fn arb_raw_arguments() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("{}".to_string()),
        "[a-z_]{1,10}".prop_map(|k| format!("{{\"{k}\": \"v\"}}")),
        "[{}\\[\\]a-z:\", ]{0,40}",
    ]
}

fn arb_tool_use_block() -> impl Strategy<Value = ContentBlock> {
    ("call_[a-z0-9]{5,12}", "[a-z_]{3,20}", arb_raw_arguments())
        .prop_map(|(id, name, arguments)| ContentBlock::ToolUse {
            id,
            name,
            arguments,
        })
}

fn arb_tool_result_block() -> impl Strategy<Value = ContentBlock> {
    ("call_[a-z0-9]{5,12}", "[a-zA-Z0-9 _.!?,]{0,100}").prop_map(|(tool_use_id, content)| {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        }
    })
}

fn arb_user_message() -> impl Strategy<Value = LlmMessage> {
    prop::collection::vec(
        prop_oneof![
            3 => arb_text_block(),
            1 => arb_image_block(),
            2 => arb_tool_result_block(),
        ],
        0..6,
    )
    .prop_map(|content| LlmMessage {
        role: MessageRole::User,
        content,
    })
}

fn arb_assistant_message() -> impl Strategy<Value = LlmMessage> {
    prop::collection::vec(
        prop_oneof![2 => arb_text_block(), 1 => arb_tool_use_block()],
        0..5,
    )
    .prop_map(|content| LlmMessage {
        role: MessageRole::Assistant,
        content,
    })
}

fn arb_message() -> impl Strategy<Value = LlmMessage> {
    prop_oneof![arb_user_message(), arb_assistant_message()]
}

/// Wire tool call; names may be empty to exercise the drop path
fn arb_wire_tool_call() -> impl Strategy<Value = (String, String, String)> {
    (
        "call_[a-z0-9]{5,12}",
        prop_oneof![3 => "[a-z_]{3,20}", 1 => Just(String::new())],
        arb_raw_arguments(),
    )
}

fn wire_response(text: Option<&str>, calls: &[(String, String, String)]) -> OpenAIResponse {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, args)| {
            json!({"id": id, "type": "function", "function": {"name": name, "arguments": args}})
        })
        .collect();
    let raw = json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": text,
                "tool_calls": if tool_calls.is_empty() { Value::Null } else { Value::Array(tool_calls) },
            },
            "finish_reason": if calls.is_empty() { "stop" } else { "tool_calls" },
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    });
    serde_json::from_value(raw).unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn translation_never_empty(msg in arb_message()) {
        let out = translate_message(&msg);
        prop_assert!(!out.is_empty());
    }

    #[test]
    fn tool_results_map_one_to_one(msg in arb_user_message()) {
        let expected: Vec<String> = msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect();

        let out = serde_json::to_value(translate_message(&msg)).unwrap();
        let ids: Vec<String> = out
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["role"] == "tool")
            .map(|m| m["tool_call_id"].as_str().unwrap().to_string())
            .collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn text_only_messages_are_plain_strings(
        texts in prop::collection::vec("[a-zA-Z0-9 ]{1,30}", 1..5)
    ) {
        let msg = LlmMessage {
            role: MessageRole::User,
            content: texts.iter().map(ContentBlock::text).collect(),
        };
        let out = serde_json::to_value(translate_message(&msg)).unwrap();
        let joined = texts.join("\n");
        prop_assert_eq!(out[0]["content"].as_str(), Some(joined.as_str()));
    }

    #[test]
    fn assistant_arguments_pass_through(msg in arb_assistant_message()) {
        let expected: Vec<String> = msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { arguments, .. } => Some(arguments.clone()),
                _ => None,
            })
            .collect();
        let out = serde_json::to_value(translate_message(&msg)).unwrap();
        let got: Vec<String> = out[0]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| c["function"]["arguments"].as_str().unwrap().to_string())
                    .collect()
            })
            .unwrap_or_default();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn normalize_keeps_named_calls_in_order(
        text in prop::option::of("[a-zA-Z0-9 ]{1,40}"),
        calls in prop::collection::vec(arb_wire_tool_call(), 0..5)
    ) {
        let resp = normalize_response(wire_response(text.as_deref(), &calls)).unwrap();
        let expected: Vec<(String, String, String)> = calls
            .iter()
            .filter(|(_, name, _)| !name.is_empty())
            .cloned()
            .collect();
        let got: Vec<(String, String, String)> = resp
            .tool_uses()
            .into_iter()
            .map(|u| (u.id, u.name, u.arguments))
            .collect();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(resp.text(), text.unwrap_or_default());
    }
}
