//! Relay an upstream Server-Sent-Events stream to the client, rewriting each chunk.
//!
//! SSE framing is handled by `eventsource-stream`. The relay is strictly
//! one-event-at-a-time: each upstream event is rewritten by [`normalize_chunk`]
//! and yielded immediately, and nothing is accumulated across events. Chunks are
//! forwarded in the order received.
//!
//! Termination is always well formed. The stream ends with [`DONE_SENTINEL`] when
//! upstream sends it, when upstream closes without it, and after a synthetic error
//! chunk when the upstream stream fails mid-flight.

use super::vendor::{
    strip_vendor_fields, CHOICE_VENDOR_FIELDS, MESSAGE_VENDOR_FIELDS, REASONING_FIELD,
    RESPONSE_VENDOR_FIELDS,
};
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::fmt::Display;

/// Payload of the terminal SSE event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What one upstream event means to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Event without data; nothing to forward.
    Skip,
    /// Unparseable payload; dropped without ending the stream.
    Malformed(String),
    /// Upstream signalled completion.
    Done,
    /// A rewritten chunk ready to forward.
    Chunk(String),
}

/// Classify and rewrite the `data` of one upstream event.
pub fn process_event_data(data: &str) -> EventOutcome {
    let data = data.trim();
    if data.is_empty() {
        return EventOutcome::Skip;
    }

    if data == DONE_SENTINEL {
        return EventOutcome::Done;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(mut chunk) => {
            normalize_chunk(&mut chunk);
            EventOutcome::Chunk(chunk.to_string())
        }
        Err(e) => EventOutcome::Malformed(e.to_string()),
    }
}

/// Rewrite one streamed chunk in place.
///
/// The reasoning channel is dropped from every delta. Role-only deltas are kept;
/// they are harmless to clients.
pub fn normalize_chunk(chunk: &mut Value) {
    let Some(obj) = chunk.as_object_mut() else {
        return;
    };

    if let Some(Value::Array(choices)) = obj.get_mut("choices") {
        for choice in choices.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(Value::Object(delta)) = choice.get_mut("delta") {
                delta.remove(REASONING_FIELD);
                strip_vendor_fields(delta, MESSAGE_VENDOR_FIELDS);
            }
            strip_vendor_fields(choice, CHOICE_VENDOR_FIELDS);
        }
    }

    strip_vendor_fields(obj, RESPONSE_VENDOR_FIELDS);
}

/// The chunk sent in place of an abrupt close when the relay faults mid-stream.
pub fn error_chunk(model: &str, description: &str) -> Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {"content": format!("\n\n[Error: {description}]")},
            "finish_reason": "stop"
        }]
    })
}

/// Relay an upstream byte stream as a lazily produced sequence of SSE payloads.
///
/// Each item is the `data` of one client SSE event. Dropping the returned stream
/// (client disconnect) drops `byte_stream` and with it the upstream connection.
pub fn relay_stream<S, E>(byte_stream: S, model: String) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut forwarded: u64 = 0;
        let mut skipped: u64 = 0;

        let events = byte_stream.eventsource();
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(
                        model = %model,
                        forwarded,
                        error = %e,
                        "Upstream stream failed mid-flight"
                    );
                    yield error_chunk(&model, &format!("upstream stream interrupted: {e}")).to_string();
                    yield DONE_SENTINEL.to_string();
                    return;
                }
            };

            match process_event_data(&event.data) {
                EventOutcome::Skip => {}
                EventOutcome::Malformed(reason) => {
                    skipped += 1;
                    tracing::debug!(error = %reason, "Skipping unparseable chunk");
                }
                EventOutcome::Done => {
                    tracing::info!(model = %model, forwarded, skipped, "Stream completed");
                    yield DONE_SENTINEL.to_string();
                    return;
                }
                EventOutcome::Chunk(data) => {
                    forwarded += 1;
                    yield data;
                }
            }
        }

        tracing::warn!(model = %model, forwarded, skipped, "Upstream closed without [DONE]");
        yield DONE_SENTINEL.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk_line(i: usize) -> String {
        format!(
            "data: {}\n\n",
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "model": "deepseek/deepseek-r1",
                "prompt_token_ids": [1, 2],
                "choices": [{
                    "index": 0,
                    "delta": {"content": format!("tok{i}"), "reasoning_content": "hmm"},
                    "finish_reason": null,
                    "stop_reason": null
                }]
            })
        )
    }

    async fn collect(parts: Vec<std::result::Result<Bytes, String>>) -> Vec<String> {
        relay_stream(stream::iter(parts), "deepseek/deepseek-r1".to_string())
            .collect()
            .await
    }

    #[test]
    fn test_process_event_data_variants() {
        assert_eq!(process_event_data(""), EventOutcome::Skip);
        assert_eq!(process_event_data("[DONE]"), EventOutcome::Done);
        assert_eq!(process_event_data(" [DONE] "), EventOutcome::Done);
        assert!(matches!(process_event_data("{oops"), EventOutcome::Malformed(_)));
        assert!(matches!(process_event_data("{\"choices\":[]}"), EventOutcome::Chunk(_)));
    }

    #[test]
    fn test_normalize_chunk_strips_reasoning_and_vendor_fields() {
        let mut chunk = json!({
            "id": "c",
            "prompt_token_ids": [1],
            "choices": [{
                "index": 0,
                "delta": {
                    "role": "assistant",
                    "content": " hi",
                    "reasoning_content": "thinking",
                    "mm_embedding_handle": "h",
                    "disaggregated_params": {}
                },
                "avg_decoded_tokens_per_iter": 2.0,
                "stop_reason": null,
                "finish_reason": null
            }]
        });
        normalize_chunk(&mut chunk);

        assert_eq!(
            chunk,
            json!({
                "id": "c",
                "choices": [{
                    "index": 0,
                    "delta": {"role": "assistant", "content": " hi"},
                    "finish_reason": null
                }]
            })
        );
    }

    #[test]
    fn test_role_only_delta_is_forwarded() {
        let outcome = process_event_data(r#"{"choices":[{"index":0,"delta":{"role":"assistant","reasoning_content":"x"}}]}"#);
        let data = match outcome {
            EventOutcome::Chunk(data) => data,
            other => panic!("expected a chunk, got {other:?}"),
        };
        let chunk: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(chunk["choices"][0]["delta"], json!({"role": "assistant"}));
    }

    #[tokio::test]
    async fn test_relay_forwards_chunks_in_order_then_done() {
        let parts = (0..5).map(|i| Ok(Bytes::from(chunk_line(i)))).chain(std::iter::once(Ok(
            Bytes::from_static(b"data: [DONE]\n\n"),
        )));
        let out = collect(parts.collect()).await;

        assert_eq!(out.len(), 6);
        for (i, data) in out[..5].iter().enumerate() {
            let chunk: Value = serde_json::from_str(data).unwrap();
            assert_eq!(chunk["choices"][0]["delta"], json!({"content": format!("tok{i}")}));
            assert!(chunk.get("prompt_token_ids").is_none());
            assert!(chunk["choices"][0].get("stop_reason").is_none());
        }
        assert_eq!(out[5], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_skips_malformed_line() {
        let mut parts: Vec<std::result::Result<Bytes, String>> = Vec::new();
        parts.push(Ok(Bytes::from(chunk_line(0))));
        parts.push(Ok(Bytes::from(chunk_line(1))));
        parts.push(Ok(Bytes::from_static(b"data: {not json at all\n\n")));
        parts.push(Ok(Bytes::from(chunk_line(2))));
        parts.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));

        let out = collect(parts).await;

        assert_eq!(out.len(), 4);
        let contents: Vec<Value> = out[..3]
            .iter()
            .map(|d| serde_json::from_str::<Value>(d).unwrap()["choices"][0]["delta"]["content"].clone())
            .collect();
        assert_eq!(contents, vec![json!("tok0"), json!("tok1"), json!("tok2")]);
        assert_eq!(out[3], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_handles_chunks_split_mid_line() {
        let whole = format!("{}{}data: [DONE]\n\n", chunk_line(0), chunk_line(1));
        let bytes = whole.into_bytes();
        let parts: Vec<std::result::Result<Bytes, String>> = bytes
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let out = collect(parts).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_stops_at_done() {
        let parts = vec![
            Ok(Bytes::from(chunk_line(0))),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
            Ok(Bytes::from(chunk_line(1))),
        ];
        let out = collect(parts).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_mid_stream_error_emits_error_chunk_then_done() {
        let parts = vec![
            Ok(Bytes::from(chunk_line(0))),
            Err("connection reset by peer".to_string()),
            Ok(Bytes::from(chunk_line(1))),
        ];
        let out = collect(parts).await;

        assert_eq!(out.len(), 3);
        let error: Value = serde_json::from_str(&out[1]).unwrap();
        assert_eq!(error["object"], "chat.completion.chunk");
        assert_eq!(error["model"], "deepseek/deepseek-r1");
        assert_eq!(error["choices"][0]["finish_reason"], "stop");
        let content = error["choices"][0]["delta"]["content"].as_str().unwrap();
        assert!(content.contains("[Error:"));
        assert!(content.contains("connection reset by peer"));
        assert_eq!(out[2], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_terminates_when_upstream_closes_without_done() {
        let parts = vec![Ok(Bytes::from(chunk_line(0))), Ok(Bytes::from(chunk_line(1)))];
        let out = collect(parts).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[2], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_ignores_comments_and_crlf_framing() {
        let parts = vec![
            Ok(Bytes::from_static(b": keep-alive\r\n\r\n")),
            Ok(Bytes::from(chunk_line(0).replace('\n', "\r\n"))),
            Ok(Bytes::from_static(b"data:[DONE]\r\n\r\n")),
        ];
        let out = collect(parts).await;

        assert_eq!(out.len(), 2);
        let chunk: Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(chunk["choices"][0]["delta"], json!({"content": "tok0"}));
        assert_eq!(out[1], DONE_SENTINEL);
    }

    #[tokio::test]
    async fn test_relay_empty_upstream_still_terminates() {
        let out = collect(Vec::new()).await;
        assert_eq!(out, vec![DONE_SENTINEL.to_string()]);
    }
}
