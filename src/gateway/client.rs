use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use super::paytr::InitRequestPayload;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway did not answer within {0:?}")]
    Timeout(Duration),
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// Thin HTTP client for the PayTR token endpoint.
#[derive(Clone, Debug)]
pub struct PaytrClient {
    client: Client,
    api_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    status: String,
    token: Option<String>,
    reason: Option<String>,
}

impl PaytrClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            timeout,
        })
    }

    /// Posts a signed initiation request and returns the iframe token.
    pub async fn request_token(&self, payload: &InitRequestPayload) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(&self.api_url)
            .form(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        tracing::debug!(status = %status, merchant_oid = %payload.merchant_oid, "PayTR get-token response");

        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        match (parsed.status.as_str(), parsed.token) {
            ("success", Some(token)) if !token.is_empty() => Ok(token),
            ("success", _) => Err(GatewayError::InvalidResponse("missing token".into())),
            _ => Err(GatewayError::Rejected(
                parsed.reason.unwrap_or_else(|| "unknown reason".into()),
            )),
        }
    }
}
