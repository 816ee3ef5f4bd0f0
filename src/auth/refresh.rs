// Token refresh logic

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, Method, Url};
use std::sync::Arc;

use super::types::{RefreshEnvelope, RefreshRequest, TokenSet};
use crate::interceptor::{RequestDescriptor, RequestInterceptor};

/// Issues refresh calls against the remote refresh endpoint
///
/// The refresh call is decorated like any other outgoing request.
#[derive(Clone)]
pub struct TokenRefresher {
    client: Client,
    url: Url,
    interceptor: Arc<RequestInterceptor>,
}

impl TokenRefresher {
    pub fn new(client: Client, url: Url, interceptor: Arc<RequestInterceptor>) -> Self {
        Self {
            client,
            url,
            interceptor,
        }
    }

    /// Refresh endpoint URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Exchange a refresh token for a complete new token set.
    /// The expiry is `expires_in` seconds after the call was issued.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        tracing::info!(url = %self.url, "Refreshing access token...");

        let mut request = RequestDescriptor::new(Method::POST, self.url.as_str());
        request.body = Some(
            serde_json::to_value(RefreshRequest { refresh_token })
                .context("Failed to encode refresh request")?,
        );
        let request = self.interceptor.decorate(request);

        let mut builder = self
            .client
            .request(request.method.clone(), self.url.clone())
            .headers(request.header_map()?);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let issued_at = Utc::now();
        let response = builder
            .send()
            .await
            .context("Failed to send refresh request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                body = %error_text,
                "Token refresh rejected"
            );
            anyhow::bail!("Token refresh failed: {} - {}", status, error_text);
        }

        let data: RefreshEnvelope = response
            .json()
            .await
            .context("Failed to parse refresh response")?;
        let data = data.into_inner();

        if let Some(field) = data.missing_field() {
            anyhow::bail!("Refresh response does not contain a usable {}", field);
        }

        let token_set = data.into_token_set(issued_at);

        tracing::info!(
            "Token refreshed, expires: {}",
            token_set.expires_at.to_rfc3339()
        );

        Ok(token_set)
    }
}
