//! HTTP gateway provider.
//!
//! Vendor wire formats live behind a gateway service; morph only speaks one
//! small JSON contract to it:
//!
//! ```text
//! POST {base_url}/generate/{provider}
//! { "prompt", "sourceAsset", "assetLabel", "kind", "basePrompt"?, "iteration"? }
//! -> 200 { "assetRef", "metadata"? }
//! ```

use async_trait::async_trait;
use morph_protocol::{
    AssetRef, GeneratedImage, GenerationRequest, ImageProvider, ProviderError, ProviderKind,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a> {
    prompt: &'a str,
    source_asset: &'a AssetRef,
    asset_label: &'a str,
    kind: ProviderKind,
    /// Batch calls only: the unvaried prompt and the 1-based iteration index.
    #[serde(skip_serializing_if = "Option::is_none")]
    base_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iteration: Option<u32>,
}

impl<'a> GatewayRequest<'a> {
    fn new(request: &'a GenerationRequest, kind: ProviderKind) -> Self {
        let variation = request.variation.as_ref();
        Self {
            prompt: &request.prompt,
            source_asset: &request.source,
            asset_label: &request.asset_label,
            kind,
            base_prompt: variation.map(|v| v.base_prompt.as_str()),
            iteration: variation.map(|v| v.iteration),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayResponse {
    #[serde(default)]
    asset_ref: Option<AssetRef>,
    #[serde(default)]
    metadata: indexmap::IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct HttpGatewayProvider {
    client: reqwest::Client,
    endpoint: String,
    kind: ProviderKind,
    api_key: Option<String>,
}

impl HttpGatewayProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        provider: &str,
        kind: ProviderKind,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/generate/{provider}", base_url.trim_end_matches('/')),
            kind,
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn status_error(status: StatusCode, body: String) -> ProviderError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        // The adapter's own deadline carries the real budget; the gateway gave up first.
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Transport(format!("gateway timed out: {detail}"))
        }
        _ => ProviderError::Transport(detail),
    }
}

fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_decode() {
        ProviderError::InvalidResponse(error.to_string())
    } else {
        ProviderError::Transport(error.to_string())
    }
}

#[async_trait]
impl ImageProvider for HttpGatewayProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        let body = GatewayRequest::new(request, self.kind);
        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        debug!(endpoint = %self.endpoint, label = %request.asset_label, "calling gateway");

        let response = call.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }
        let parsed: GatewayResponse = response.json().await.map_err(transport_error)?;
        let asset_ref = parsed
            .asset_ref
            .filter(|asset| !asset.as_str().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("response carried no assetRef".into()))?;
        Ok(GeneratedImage {
            asset_ref,
            metadata: parsed.metadata,
        })
    }
}
