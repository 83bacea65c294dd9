//! Translate client chat completion requests into upstream requests.
//!
//! Applies the default model and temperature and the token-limit policy.
//! Optional sampling parameters are forwarded only when the client sent them.

use super::types::{ChatRequest, UpstreamRequest};
use crate::config::TokenLimits;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Translate a client request into the upstream request shape.
/// Pure function: the `stream` field of the result tells the caller which path to take.
pub fn translate_request(
    req: &ChatRequest,
    default_model: &str,
    limits: &TokenLimits,
) -> UpstreamRequest {
    UpstreamRequest {
        model: req
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        messages: req.messages.clone(),
        temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: resolve_max_tokens(req.max_tokens, limits),
        stream: req.stream.unwrap_or(false),
        top_p: req.top_p,
        frequency_penalty: req.frequency_penalty,
        presence_penalty: req.presence_penalty,
    }
}

/// Token-limit safety net.
///
/// - absent: the generous default, so long answers are not cut short
/// - below `low_threshold`: raised to `floor`; tiny limits produce truncated,
///   unusable completions and are almost always a client mistake
/// - otherwise: capped at `ceiling`
#[must_use]
pub fn resolve_max_tokens(requested: Option<u64>, limits: &TokenLimits) -> u64 {
    match requested {
        None => limits.default_max_tokens,
        Some(n) if n < limits.low_threshold => limits.floor,
        Some(n) => n.min(limits.ceiling),
    }
}
