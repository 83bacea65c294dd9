use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::response::normalize_response;
use crate::translate::streaming::relay_stream;
use crate::translate::types::UpstreamRequest;

use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Stream of client SSE payloads; each item becomes one `data:` event.
pub type SseStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Build the single HTTP client shared by all requests.
///
/// The timeout bounds connecting and each idle gap between reads, so a stream
/// that keeps producing chunks is never cut off. Buffered calls add a total
/// deadline per request in [`proxy_non_streaming`].
pub fn build_http_client(config: &ProxyConfig) -> Result<reqwest::Client> {
    let timeout = Duration::from_secs(config.upstream.timeout_secs);
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| ProxyError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Forward a buffered request and normalize the upstream body.
///
/// One upstream call, never retried.
pub async fn proxy_non_streaming(
    req: &UpstreamRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<Value> {
    let deadline = Duration::from_secs(config.upstream.timeout_secs);
    let response = send_upstream(req, config, client, api_key, Some(deadline)).await?;

    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::from_reqwest(e, config.upstream.timeout_secs))?;

    tracing::debug!(body_len = body.len(), "Upstream response received");

    let upstream: Value = serde_json::from_str(&body).map_err(|e| {
        ProxyError::bad_upstream_response(format!(
            "failed to parse upstream body: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let normalized = normalize_response(upstream, config.normalize.reasoning_policy);

    if let Some(usage) = normalized.get("usage") {
        tracing::info!(
            model = %req.model,
            prompt_tokens = %usage["prompt_tokens"],
            completion_tokens = %usage["completion_tokens"],
            "Completed"
        );
    }

    Ok(normalized)
}

/// Forward a streaming request, returning the relayed client event stream.
///
/// An upstream error status is reported before any event is produced.
pub async fn proxy_streaming(
    req: &UpstreamRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<SseStream> {
    let response = send_upstream(req, config, client, api_key, None).await?;

    let timeout_secs = config.upstream.timeout_secs;
    let bytes = response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| ProxyError::from_reqwest(e, timeout_secs)));

    Ok(Box::pin(relay_stream(bytes, req.model.clone())))
}

async fn send_upstream(
    req: &UpstreamRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
    deadline: Option<Duration>,
) -> Result<reqwest::Response> {
    let url = format!("{}/chat/completions", config.base_url());

    tracing::info!(
        url = %url,
        model = %req.model,
        stream = req.stream,
        max_tokens = req.max_tokens,
        "POST upstream"
    );

    let mut request = client.post(&url).bearer_auth(api_key).json(req);
    if let Some(deadline) = deadline {
        request = request.timeout(deadline);
    }

    let response = request
        .send()
        .await
        .map_err(|e| {
            let err = ProxyError::from_reqwest(e, config.upstream.timeout_secs);
            tracing::error!(error = %err, "Upstream request failed");
            err
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %truncate(&text, 300), "Upstream error");
        return Err(ProxyError::upstream(status.as_u16(), truncate(&text, 2000)));
    }

    Ok(response)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
