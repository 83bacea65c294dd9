//! Model listing.
//!
//! Passes the upstream `/models` catalog through unchanged. When upstream is
//! unreachable or answers with something that is not JSON, a static catalog of
//! known models is returned instead so clients can still populate a model picker.

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::types::{ModelEntry, ModelList};
use serde_json::Value;

/// Fetch the upstream catalog, returning its status and JSON body.
///
/// # Errors
/// Returns `ProxyError::Request`/`Timeout` on transport failure and
/// `ProxyError::BadUpstreamResponse` when the body is not JSON.
pub async fn fetch_upstream_models(
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<(u16, Value)> {
    let url = format!("{}/models", config.base_url());
    let response = client
        .get(&url)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|e| ProxyError::from_reqwest(e, config.upstream.timeout_secs))?;

    let status = response.status().as_u16();
    let body: Value = response.json().await.map_err(|e| {
        ProxyError::bad_upstream_response(format!("failed to parse models response: {e}"))
    })?;

    Ok((status, body))
}

/// List models, falling back to the static catalog when upstream fails.
pub async fn list_models(
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> (u16, Value) {
    match fetch_upstream_models(config, client, api_key).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(error = %e, "Model listing failed, serving fallback catalog");
            (200, fallback_catalog(config))
        }
    }
}

#[must_use]
pub fn fallback_catalog(config: &ProxyConfig) -> Value {
    let list = ModelList {
        object: "list".to_string(),
        data: config
            .models
            .fallback
            .iter()
            .map(|id| ModelEntry {
                id: id.clone(),
                object: "model".to_string(),
                owned_by: "nvidia".to_string(),
            })
            .collect(),
    };
    serde_json::to_value(list).unwrap_or(Value::Null)
}
