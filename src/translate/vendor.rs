//! Upstream-only fields that have no equivalent in the client contract.
//!
//! Each level of a completion (message or delta, choice, top-level object)
//! has its own set; [`strip_vendor_fields`] removes one set from one object.

use serde_json::{Map, Value};

/// Stripped from `message` (non-streaming) and `delta` (streaming).
pub const MESSAGE_VENDOR_FIELDS: &[&str] = &["mm_embedding_handle", "disaggregated_params"];

/// Stripped from every element of `choices`.
pub const CHOICE_VENDOR_FIELDS: &[&str] = &[
    "mm_embedding_handle",
    "disaggregated_params",
    "avg_decoded_tokens_per_iter",
    "stop_reason",
];

/// Stripped from the completion or chunk object itself.
pub const RESPONSE_VENDOR_FIELDS: &[&str] = &["prompt_token_ids"];

/// The secondary reasoning text channel.
pub const REASONING_FIELD: &str = "reasoning_content";

/// Remove every key in `fields` from `obj`. Returns how many were present.
pub fn strip_vendor_fields(obj: &mut Map<String, Value>, fields: &[&str]) -> usize {
    fields
        .iter()
        .filter(|field| obj.remove(**field).is_some())
        .count()
}
