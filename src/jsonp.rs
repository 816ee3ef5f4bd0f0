// JSONP transport
//
// Script-injection requests: a globally named callback is registered, a script
// element pointing at the URL is injected, and the loaded script answers by
// calling the callback. There is no failure channel. A script that never calls
// back leaves the call pending forever, so callers that need a deadline wrap
// the call in `tokio::time::timeout`.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::ApiError;

/// Callback name used when the caller does not pick one
pub const DEFAULT_CALLBACK: &str = "jsonp";

/// `callbackName(<json>)` with an optional trailing semicolon
static CALLBACK_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([\s\S]*)\)\s*;?\s*$").unwrap()
});

struct Registration {
    owner: String,
    sender: oneshot::Sender<Value>,
}

/// Injected script elements and global callbacks of the host page
#[derive(Default)]
pub struct ScriptHost {
    scripts: DashMap<String, Url>,
    callbacks: DashMap<String, Registration>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of injected script elements
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    pub fn has_script(&self, id: &str) -> bool {
        self.scripts.contains_key(id)
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Install a global callback. A newer registration under the same name
    /// replaces the older one, which then never fires.
    fn register(&self, name: &str, owner: &str, sender: oneshot::Sender<Value>) {
        let previous = self.callbacks.insert(
            name.to_string(),
            Registration {
                owner: owner.to_string(),
                sender,
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                callback = name,
                replaced = %previous.owner,
                "JSONP callback replaced by a newer call"
            );
        }
    }

    fn inject(&self, id: &str, src: Url) {
        self.scripts.insert(id.to_string(), src);
    }

    /// Call a global callback the way a loaded script does.
    /// Returns false when no callback of that name is registered.
    pub fn invoke(&self, name: &str, payload: Value) -> bool {
        match self.callbacks.remove(name) {
            Some((_, registration)) => {
                // The waiting call may already be gone; nothing to deliver then
                let _ = registration.sender.send(payload);
                true
            }
            None => {
                tracing::debug!(callback = name, "JSONP script called unknown callback");
                false
            }
        }
    }

    /// Run a loaded script body of the form `name(<json>)`
    pub fn evaluate(&self, script: &str) -> bool {
        let Some(captures) = CALLBACK_CALL.captures(script) else {
            tracing::warn!("JSONP response is not a callback invocation");
            return false;
        };

        let name = &captures[1];
        let args = captures[2].trim();
        let payload = if args.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(args) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(callback = name, "JSONP payload is not JSON: {}", e);
                    return false;
                }
            }
        };

        self.invoke(name, payload)
    }

    /// Remove this call's script element and, if still owned by it, its
    /// callback. Each entry can only be removed once.
    fn release(&self, id: &str, name: &str) {
        self.scripts.remove(id);
        self.callbacks.remove_if(name, |_, registration| registration.owner == id);
    }
}

/// Cleans up one JSONP call when it completes or is dropped
struct ScriptGuard {
    host: Arc<ScriptHost>,
    id: String,
    name: String,
}

impl Drop for ScriptGuard {
    fn drop(&mut self) {
        self.host.release(&self.id, &self.name);
    }
}

/// Fetches the body of an injected script
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load(&self, src: &Url) -> anyhow::Result<String>;
}

/// Loads scripts over HTTP
#[derive(Debug, Clone)]
pub struct HttpScriptLoader {
    client: Client,
}

impl HttpScriptLoader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ScriptLoader for HttpScriptLoader {
    async fn load(&self, src: &Url) -> anyhow::Result<String> {
        let response = self.client.get(src.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Script load failed: {}", status);
        }
        Ok(response.text().await?)
    }
}

/// Script-injection transport behind the client's `jsonp` method
pub struct JsonpTransport {
    host: Arc<ScriptHost>,
    loader: Arc<dyn ScriptLoader>,
}

impl JsonpTransport {
    pub fn new(host: Arc<ScriptHost>, loader: Arc<dyn ScriptLoader>) -> Self {
        Self { host, loader }
    }

    pub fn host(&self) -> &Arc<ScriptHost> {
        &self.host
    }

    /// Resolve with whatever the script at `src` passes to callback `name`
    pub async fn request(&self, src: &str, name: &str) -> Result<Value, ApiError> {
        let src = Url::parse(src)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid JSONP URL {}: {}", src, e)))?;

        let id = format!("jsonp{}", uuid::Uuid::new_v4().simple());
        let (sender, receiver) = oneshot::channel();

        self.host.register(name, &id, sender);
        self.host.inject(&id, src.clone());
        let _guard = ScriptGuard {
            host: self.host.clone(),
            id: id.clone(),
            name: name.to_string(),
        };

        tracing::debug!(id = %id, callback = name, src = %src, "Injecting JSONP script");

        let host = self.host.clone();
        let loader = self.loader.clone();
        tokio::spawn(async move {
            match loader.load(&src).await {
                // A removed element does not run
                Ok(body) if host.has_script(&id) => {
                    host.evaluate(&body);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(id = %id, src = %src, "JSONP script failed to load: {:#}", e),
            }
        });

        match receiver.await {
            Ok(payload) => Ok(payload),
            // Callback was replaced by a newer call with the same name
            Err(_) => std::future::pending().await,
        }
    }
}
