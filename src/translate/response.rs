//! Normalize a buffered upstream completion into the client-visible shape.
//!
//! Works on `serde_json::Value` so unknown fields pass through. A shape the
//! normalizer does not expect never fails the request: the fault is logged
//! and the partially normalized body is returned.

use super::vendor::{
    strip_vendor_fields, CHOICE_VENDOR_FIELDS, MESSAGE_VENDOR_FIELDS, REASONING_FIELD,
    RESPONSE_VENDOR_FIELDS,
};
use crate::config::ReasoningPolicy;
use crate::error::{ProxyError, Result};
use serde_json::{Map, Value};

/// Substituted whenever normalization would leave `content` empty.
pub const FALLBACK_CONTENT: &str =
    "I apologize, but I couldn't generate a response. Please try again.";

/// Normalize a successful upstream response body. Never fails.
pub fn normalize_response(mut body: Value, policy: ReasoningPolicy) -> Value {
    if let Err(e) = normalize_choices(&mut body, policy) {
        tracing::warn!(error = %e, "Returning partially normalized response");
    }

    if let Some(obj) = body.as_object_mut() {
        strip_vendor_fields(obj, RESPONSE_VENDOR_FIELDS);
    }

    body
}

/// Normalize every choice, continuing past malformed ones. Reports the first fault.
fn normalize_choices(body: &mut Value, policy: ReasoningPolicy) -> Result<()> {
    let choices = body
        .get_mut("choices")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ProxyError::normalization("response has no `choices` array"))?;

    let mut first_fault = None;

    for (index, choice) in choices.iter_mut().enumerate() {
        let Some(choice) = choice.as_object_mut() else {
            if first_fault.is_none() {
                first_fault = Some(format!("choice {index} is not an object"));
            }
            continue;
        };

        match choice.get_mut("message") {
            Some(Value::Object(message)) => normalize_message(message, policy),
            Some(_) => {
                if first_fault.is_none() {
                    first_fault = Some(format!("choice {index} has a non-object message"));
                }
            }
            None => {}
        }

        strip_vendor_fields(choice, CHOICE_VENDOR_FIELDS);
    }

    first_fault.map_or(Ok(()), |message| Err(ProxyError::normalization(message)))
}

/// Rewrite one upstream message in place. Step order matters.
pub fn normalize_message(message: &mut Map<String, Value>, policy: ReasoningPolicy) {
    if let Some(Value::String(content)) = message.get_mut("content") {
        let trimmed = content.trim();
        if trimmed.len() != content.len() {
            *content = trimmed.to_string();
        }
    }

    message.entry("refusal").or_insert(Value::Null);

    if let Some(reasoning) = message.remove(REASONING_FIELD) {
        let reasoning = reasoning.as_str().map(str::trim).unwrap_or_default();
        let merged = match message.get("content") {
            None | Some(Value::Null) => Some(merge_reasoning("", reasoning, policy)),
            Some(Value::String(content)) => Some(merge_reasoning(content.trim(), reasoning, policy)),
            // multi-part content is left alone
            Some(_) => None,
        };
        if let Some(merged) = merged {
            message.insert("content".to_string(), Value::String(merged));
        }
    }

    let empty_tool_calls = match message.get("tool_calls") {
        Some(Value::Array(calls)) => calls.is_empty(),
        Some(Value::Null) => true,
        _ => false,
    };
    if empty_tool_calls {
        message.remove("tool_calls");
    }

    strip_vendor_fields(message, MESSAGE_VENDOR_FIELDS);

    let content_missing = match message.get("content") {
        None | Some(Value::Null) => true,
        Some(Value::String(content)) => content.is_empty(),
        Some(_) => false,
    };
    if content_missing {
        message.insert(
            "content".to_string(),
            Value::String(FALLBACK_CONTENT.to_string()),
        );
    }
}

/// Merge the trimmed reasoning channel into the trimmed content.
#[must_use]
pub fn merge_reasoning(content: &str, reasoning: &str, policy: ReasoningPolicy) -> String {
    match policy {
        ReasoningPolicy::ContentFirst => {
            if content.is_empty() {
                reasoning.to_string()
            } else {
                content.to_string()
            }
        }
        ReasoningPolicy::Concatenate => match (reasoning.is_empty(), content.is_empty()) {
            (false, false) => format!("{reasoning}\n\n{content}"),
            (false, true) => reasoning.to_string(),
            _ => content.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(message: Value) -> Value {
        normalized_with(message, ReasoningPolicy::ContentFirst)
    }

    fn normalized_with(mut message: Value, policy: ReasoningPolicy) -> Value {
        normalize_message(message.as_object_mut().unwrap(), policy);
        message
    }

    fn completion(message: Value) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "deepseek/deepseek-r1",
            "prompt_token_ids": [1, 2, 3],
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": "stop",
                "stop_reason": null,
                "avg_decoded_tokens_per_iter": 1.0,
                "mm_embedding_handle": null,
                "disaggregated_params": null
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        })
    }

    #[test]
    fn test_reasoning_used_when_content_empty() {
        let out = normalized(json!({"content": "", "reasoning_content": "  thinking...  "}));
        assert_eq!(out, json!({"content": "thinking...", "refusal": null}));
    }

    #[test]
    fn test_content_wins_over_reasoning() {
        let out = normalized(json!({"content": "Hello", "reasoning_content": "ignored"}));
        assert_eq!(out, json!({"content": "Hello", "refusal": null}));
    }

    #[test]
    fn test_null_content_with_reasoning() {
        let out = normalized(json!({"role": "assistant", "content": null, "reasoning_content": "why"}));
        assert_eq!(out["content"], "why");
        assert!(out.get(REASONING_FIELD).is_none());
    }

    #[test]
    fn test_empty_content_gets_fallback() {
        let out = normalized(json!({"role": "assistant", "content": ""}));
        assert_eq!(out["content"], FALLBACK_CONTENT);
        assert_eq!(out["refusal"], Value::Null);
    }

    #[test]
    fn test_whitespace_content_and_reasoning_gets_fallback() {
        let out = normalized(json!({"content": "   ", "reasoning_content": "\n\t"}));
        assert_eq!(out["content"], FALLBACK_CONTENT);
        assert!(out.get(REASONING_FIELD).is_none());
    }

    #[test]
    fn test_missing_content_gets_fallback() {
        let out = normalized(json!({"role": "assistant"}));
        assert_eq!(out["content"], FALLBACK_CONTENT);
    }

    #[test]
    fn test_content_trimmed() {
        let out = normalized(json!({"content": "\n  Hi there \n"}));
        assert_eq!(out["content"], "Hi there");
    }

    #[test]
    fn test_existing_refusal_preserved() {
        let out = normalized(json!({"content": "no", "refusal": "I can't help with that"}));
        assert_eq!(out["refusal"], "I can't help with that");
    }

    #[test]
    fn test_empty_tool_calls_removed() {
        let out = normalized(json!({"content": "ok", "tool_calls": []}));
        assert!(out.get("tool_calls").is_none());

        let out = normalized(json!({"content": "ok", "tool_calls": null}));
        assert!(out.get("tool_calls").is_none());
    }

    #[test]
    fn test_non_empty_tool_calls_kept() {
        let calls = json!([{
            "id": "call_1",
            "type": "function",
            "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
        }]);
        let out = normalized(json!({"content": "checking", "tool_calls": calls.clone()}));
        assert_eq!(out["tool_calls"], calls);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let clean = json!({"role": "assistant", "content": "Hello", "refusal": null});
        assert_eq!(normalized(clean.clone()), clean);

        let once = normalized(json!({
            "content": " ",
            "reasoning_content": "r",
            "tool_calls": [],
            "mm_embedding_handle": "h"
        }));
        assert_eq!(normalized(once.clone()), once);
    }

    #[test]
    fn test_concatenate_policy() {
        let out = normalized_with(
            json!({"content": "answer", "reasoning_content": " thoughts "}),
            ReasoningPolicy::Concatenate,
        );
        assert_eq!(out["content"], "thoughts\n\nanswer");

        let out = normalized_with(
            json!({"content": "", "reasoning_content": "thoughts"}),
            ReasoningPolicy::Concatenate,
        );
        assert_eq!(out["content"], "thoughts");
    }

    #[test]
    fn test_vendor_fields_stripped_at_every_level() {
        let out = normalize_response(
            completion(json!({
                "role": "assistant",
                "content": "Hi",
                "mm_embedding_handle": {"id": 1},
                "disaggregated_params": {}
            })),
            ReasoningPolicy::ContentFirst,
        );

        assert!(out.get("prompt_token_ids").is_none());
        let choice = &out["choices"][0];
        for field in CHOICE_VENDOR_FIELDS {
            assert!(choice.get(*field).is_none(), "choice still has {field}");
        }
        for field in MESSAGE_VENDOR_FIELDS {
            assert!(choice["message"].get(*field).is_none(), "message still has {field}");
        }
        assert_eq!(choice["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 8);
        assert_eq!(out["id"], "chatcmpl-1");
    }

    #[test]
    fn test_missing_choices_returns_best_effort_body() {
        let out = normalize_response(
            json!({"id": "x", "prompt_token_ids": [1], "object": "chat.completion"}),
            ReasoningPolicy::ContentFirst,
        );
        assert_eq!(out, json!({"id": "x", "object": "chat.completion"}));
    }

    #[test]
    fn test_malformed_choice_does_not_block_others() {
        let out = normalize_response(
            json!({"choices": ["garbage", {"index": 1, "message": {"content": ""}, "stop_reason": 1}]}),
            ReasoningPolicy::ContentFirst,
        );
        assert_eq!(out["choices"][0], "garbage");
        assert_eq!(out["choices"][1]["message"]["content"], FALLBACK_CONTENT);
        assert!(out["choices"][1].get("stop_reason").is_none());
    }

    #[test]
    fn test_non_object_body_passes_through() {
        let out = normalize_response(json!(["unexpected"]), ReasoningPolicy::ContentFirst);
        assert_eq!(out, json!(["unexpected"]));
    }
}
