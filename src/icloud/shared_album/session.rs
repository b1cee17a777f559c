use std::time::Duration;

use serde_json::Value;

use crate::icloud::error::RemoteError;

/// Status and decoded JSON body of a shared-streams call.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: u16,
    pub body: Value,
}

/// Minimal async transport used by the shared album client.
///
/// The shared-streams API answers a wrong partition with HTTP 330 and a JSON
/// body naming the right host, so implementations must hand back 330 bodies
/// instead of treating them as failures.
#[async_trait::async_trait]
pub trait StreamsSession: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<JsonResponse, RemoteError>;
}

/// Build the client for album API calls. Bodies are small JSON, so
/// `timeout` caps each request as a whole.
pub fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("icloud-album-sync/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

#[async_trait::async_trait]
impl StreamsSession for reqwest::Client {
    async fn post_json(&self, url: &str, body: &Value) -> Result<JsonResponse, RemoteError> {
        let resp = self
            .post(url)
            .header("Content-Type", "text/plain")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                url: url.to_string(),
                source: e,
            })?;

        let status = resp.status().as_u16();
        if !(resp.status().is_success() || status == 330) {
            return Err(RemoteError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        let text = resp.text().await.map_err(|e| RemoteError::Http {
            url: url.to_string(),
            source: e,
        })?;
        let body = serde_json::from_str(&text).map_err(|e| RemoteError::Malformed {
            url: url.to_string(),
            reason: format!("invalid JSON: {e}"),
        })?;
        Ok(JsonResponse { status, body })
    }
}
