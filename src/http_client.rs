use anyhow::{Context, Result};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Session, TokenRefresher};
use crate::classifier::{classify, TransportFailure};
use crate::error::ApiError;
use crate::interceptor::{InterceptorSettings, RequestDescriptor, RequestInterceptor};
use crate::jsonp::{HttpScriptLoader, JsonpTransport, ScriptHost, DEFAULT_CALLBACK};
use crate::locale::LocaleProvider;
use crate::recovery::{Hooks, RecoveryCoordinator, SendContext};

/// Transport settings for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Prefix for relative request URLs
    pub base_url: Url,
    /// Applied to every uniform verb call
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Refresh endpoint, relative to `base_url`
    pub refresh_path: String,
    pub interceptor: InterceptorSettings,
}

/// Per-call extras merged into the request before decoration.
/// Extra params are merged over the verb's params, key by key.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, Value>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Authenticated API client
///
/// Every uniform verb call is decorated, sent, and on failure classified and
/// handed to recovery before the rejection is returned.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,
    base_url: Url,
    session: Arc<Session>,
    interceptor: Arc<RequestInterceptor>,
    recovery: RecoveryCoordinator,
    jsonp: JsonpTransport,
}

impl ApiClient {
    pub fn new(
        settings: ClientSettings,
        session: Arc<Session>,
        locale: Arc<LocaleProvider>,
        hooks: Hooks,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let refresh_url = resolve_url(&settings.base_url, &settings.refresh_path)
            .context("Invalid refresh endpoint")?;
        let interceptor = Arc::new(RequestInterceptor::new(
            session.clone(),
            locale,
            settings.interceptor,
        ));
        let refresher = TokenRefresher::new(client.clone(), refresh_url, interceptor.clone());

        let recovery = RecoveryCoordinator::new(session.clone(), refresher, hooks);
        let jsonp = JsonpTransport::new(
            Arc::new(ScriptHost::new()),
            Arc::new(HttpScriptLoader::new(client.clone())),
        );

        Ok(Self {
            client,
            base_url: settings.base_url,
            session,
            interceptor,
            recovery,
            jsonp,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    pub fn jsonp_host(&self) -> &Arc<ScriptHost> {
        self.jsonp.host()
    }

    pub async fn get<R: DeserializeOwned>(
        &self,
        url: &str,
        params: &impl Serialize,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        let mut request = RequestDescriptor::new(Method::GET, url);
        request.params = to_params(params)?;
        self.request(request, options).await
    }

    pub async fn post<R: DeserializeOwned>(
        &self,
        url: &str,
        data: &impl Serialize,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        self.send_with_body(Method::POST, url, data, options).await
    }

    pub async fn put<R: DeserializeOwned>(
        &self,
        url: &str,
        data: &impl Serialize,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        self.send_with_body(Method::PUT, url, data, options).await
    }

    pub async fn patch<R: DeserializeOwned>(
        &self,
        url: &str,
        data: &impl Serialize,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        self.send_with_body(Method::PATCH, url, data, options).await
    }

    /// DELETE carries its data as a JSON body
    pub async fn delete<R: DeserializeOwned>(
        &self,
        url: &str,
        data: &impl Serialize,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        self.send_with_body(Method::DELETE, url, data, options).await
    }

    /// Script-injection request; `name` defaults to "jsonp".
    /// Not decorated, not classified, and never times out.
    pub async fn jsonp(&self, url: &str, name: Option<&str>) -> Result<Value, ApiError> {
        let src = resolve_url(&self.base_url, url)?;
        self.jsonp
            .request(src.as_str(), name.unwrap_or(DEFAULT_CALLBACK))
            .await
    }

    async fn send_with_body<R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        data: &impl Serialize,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        let mut request = RequestDescriptor::new(method, url);
        request.body = Some(
            serde_json::to_value(data)
                .map_err(|e| ApiError::InvalidRequest(format!("Unserializable body: {}", e)))?,
        );
        self.request(request, options).await
    }

    /// Send an arbitrary descriptor and decode the response payload
    pub async fn request<R: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
        options: RequestOptions,
    ) -> Result<R, ApiError> {
        let payload = self.dispatch(request, options).await?;
        serde_json::from_value(payload).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn dispatch(
        &self,
        mut request: RequestDescriptor,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        request.params.extend(options.params);
        for (name, value) in options.headers {
            request.set_header(&name, value);
        }

        // State the request goes out with, so recovery can tell what changed since
        let sent = self.recovery.send_context();

        let request = self.interceptor.decorate(request);
        let url = resolve_url(&self.base_url, &request.url)?;

        tracing::debug!(
            method = %request.method,
            url = %url,
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(request.header_map()?);
        if !request.params.is_empty() {
            builder = builder.query(&query_pairs(&request.params));
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let failure = match builder.send().await {
            Ok(response) => {
                let status = response.status();
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) if status.is_success() => {
                        tracing::warn!(
                            error = %e,
                            url = %url,
                            "Response body could not be read"
                        );
                        return self
                            .reject(
                                TransportFailure::NoResponse {
                                    reason: format!("{} (body_error)", e),
                                },
                                &sent,
                            )
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            status = status.as_u16(),
                            error = %e,
                            "Error response body could not be read"
                        );
                        String::new()
                    }
                };

                if status.is_success() {
                    tracing::debug!(status = %status, "Request successful");
                    return Ok(parse_payload(&body));
                }

                tracing::warn!(
                    status = status.as_u16(),
                    url = %url,
                    response_body = %body,
                    "Received error response"
                );
                TransportFailure::Response {
                    status: status.as_u16(),
                    body: serde_json::from_str(&body).unwrap_or(Value::Null),
                }
            }
            Err(e) => {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else if e.is_body() {
                    "body_error"
                } else {
                    "unknown"
                };

                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                TransportFailure::NoResponse {
                    reason: format!("{} ({})", e, error_kind),
                }
            }
        };

        self.reject(failure, &sent).await
    }

    /// Classify a failure, run its recovery and hand back the rejection
    async fn reject(
        &self,
        failure: TransportFailure,
        sent: &SendContext,
    ) -> Result<Value, ApiError> {
        let classified = classify(&failure);
        self.recovery.handle(&classified, sent).await;
        Err(ApiError::Rejected(classified))
    }
}

/// Join a request URL onto the base URL; absolute URLs pass through
fn resolve_url(base: &Url, url: &str) -> Result<Url, ApiError> {
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute);
    }

    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        url.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ApiError::InvalidRequest(format!("Invalid URL {}: {}", url, e)))
}

/// Query parameters from any serializable value; `()` and null mean none
fn to_params(params: &impl Serialize) -> Result<BTreeMap<String, Value>, ApiError> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(Value::Null) => Ok(BTreeMap::new()),
        Ok(other) => Err(ApiError::InvalidRequest(format!(
            "Query parameters must be an object, got {}",
            other
        ))),
        Err(e) => Err(ApiError::InvalidRequest(format!(
            "Unserializable query parameters: {}",
            e
        ))),
    }
}

/// Flatten JSON params into query pairs. Strings go as-is, nulls are dropped,
/// everything else is sent as its JSON text.
fn query_pairs(params: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Success payload: JSON when it parses, raw text otherwise, null when empty
fn parse_payload(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
