// Outgoing request decoration
//
// Applied to every uniform verb call before it reaches the transport.
// Steps run in a fixed order: auth header, locale header, cache-bust
// parameter, static header overrides.

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::auth::Session;
use crate::error::ApiError;
use crate::locale::LocaleProvider;

/// Query parameter added to GET requests when cache bypass is on.
/// A caller-supplied parameter with the same name is overwritten.
pub const CACHE_BUST_PARAM: &str = "_";

/// Header carrying the active language tag
pub const LANG_HEADER: &str = "lang";

/// A request before it is handed to the transport
///
/// Header names are stored lowercased so overrides compare case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    /// Set a header, replacing any existing value for the same name
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_lowercase(), value.into());
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Headers in transport form; fails on names or values HTTP cannot carry
    pub fn header_map(&self) -> Result<HeaderMap, ApiError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ApiError::InvalidRequest(format!("Invalid header name {}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ApiError::InvalidRequest(format!(
                    "Invalid header value for {}: {}",
                    name.as_str(),
                    e
                ))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Interceptor settings taken from configuration
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    /// Header name for the credential, usually "Authorization"
    pub token_header: String,
    /// Add a unique query parameter to every GET
    pub cache_bypass: bool,
    /// Headers forced onto every request; they win over everything else
    pub static_headers: BTreeMap<String, String>,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            token_header: "Authorization".to_string(),
            cache_bypass: true,
            static_headers: BTreeMap::new(),
        }
    }
}

/// Decorates outgoing requests with credentials and locale context
pub struct RequestInterceptor {
    session: Arc<Session>,
    locale: Arc<LocaleProvider>,
    settings: InterceptorSettings,
}

impl RequestInterceptor {
    pub fn new(
        session: Arc<Session>,
        locale: Arc<LocaleProvider>,
        settings: InterceptorSettings,
    ) -> Self {
        Self {
            session,
            locale,
            settings,
        }
    }

    pub fn settings(&self) -> &InterceptorSettings {
        &self.settings
    }

    /// Decorate a request. Never fails: an unreadable token set is treated as
    /// absent.
    pub fn decorate(&self, mut request: RequestDescriptor) -> RequestDescriptor {
        match self.session.token_set() {
            Ok(Some(token_set)) => {
                request.set_header(&self.settings.token_header, token_set.authorization());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to read token set, sending without credentials: {}", e);
            }
        }

        request.set_header(LANG_HEADER, self.locale.current());

        if self.settings.cache_bypass && request.method == Method::GET {
            request.params.insert(
                CACHE_BUST_PARAM.to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );
        }

        for (name, value) in &self.settings.static_headers {
            request.set_header(name, value.clone());
        }

        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStore, TokenSet, LANG_KEY};
    use chrono::Duration;
    use proptest::prelude::*;

    fn interceptor(settings: InterceptorSettings) -> (Arc<Session>, RequestInterceptor) {
        let session = Arc::new(Session::new(Arc::new(MemoryStore::new()), "app"));
        let locale = Arc::new(LocaleProvider::new(session.clone(), "zh-cn"));
        (
            session.clone(),
            RequestInterceptor::new(session, locale, settings),
        )
    }

    fn login(session: &Session, token_type: &str, access: &str) {
        session
            .replace_token_set(&TokenSet {
                access_token: access.to_string(),
                token_type: token_type.to_string(),
                expires_at: Utc::now() + Duration::hours(1),
                refresh_token: "r1".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_header_map_rejects_bad_values() {
        let mut request = RequestDescriptor::new(Method::GET, "/users");
        request.set_header("X-Ok", "fine");
        assert_eq!(request.header_map().unwrap().len(), 1);

        request.set_header("x-bad", "line\nbreak");
        assert!(matches!(
            request.header_map(),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_auth_header_when_logged_in() {
        let (session, interceptor) = interceptor(InterceptorSettings::default());
        login(&session, "Bearer", "abc");

        let request = interceptor.decorate(RequestDescriptor::new(Method::GET, "/users"));
        assert_eq!(request.header("Authorization"), Some("Bearer abc"));
        assert!(request.params.contains_key(CACHE_BUST_PARAM));
    }

    #[test]
    fn test_no_auth_header_when_logged_out() {
        let (_, interceptor) = interceptor(InterceptorSettings::default());
        let request = interceptor.decorate(RequestDescriptor::new(Method::POST, "/login"));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn test_custom_token_header() {
        let (session, interceptor) = interceptor(InterceptorSettings {
            token_header: "X-Access-Token".to_string(),
            ..Default::default()
        });
        login(&session, "Bearer", "abc");

        let request = interceptor.decorate(RequestDescriptor::new(Method::GET, "/users"));
        assert_eq!(request.header("x-access-token"), Some("Bearer abc"));
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn test_locale_header() {
        let (session, interceptor) = interceptor(InterceptorSettings::default());
        let request = interceptor.decorate(RequestDescriptor::new(Method::GET, "/"));
        assert_eq!(request.header(LANG_HEADER), Some("zh-cn"));

        session.set_entry(LANG_KEY, "en").unwrap();
        let request = interceptor.decorate(RequestDescriptor::new(Method::GET, "/"));
        assert_eq!(request.header(LANG_HEADER), Some("en"));
    }

    #[test]
    fn test_cache_bust_only_for_get() {
        let (_, interceptor) = interceptor(InterceptorSettings::default());
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let request = interceptor.decorate(RequestDescriptor::new(method, "/users"));
            assert!(!request.params.contains_key(CACHE_BUST_PARAM));
        }
    }

    #[test]
    fn test_cache_bust_disabled() {
        let (_, interceptor) = interceptor(InterceptorSettings {
            cache_bypass: false,
            ..Default::default()
        });
        let request = interceptor.decorate(RequestDescriptor::new(Method::GET, "/users"));
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_cache_bust_overwrites_caller_param() {
        let (_, interceptor) = interceptor(InterceptorSettings::default());
        let mut request = RequestDescriptor::new(Method::GET, "/users");
        request
            .params
            .insert(CACHE_BUST_PARAM.to_string(), Value::from("mine"));

        let request = interceptor.decorate(request);
        assert!(request.params[CACHE_BUST_PARAM].is_i64());
    }

    #[test]
    fn test_static_headers_win() {
        let mut static_headers = BTreeMap::new();
        static_headers.insert("authorization".to_string(), "Basic fixed".to_string());
        static_headers.insert("LANG".to_string(), "fr".to_string());
        static_headers.insert("X-Client".to_string(), "admin".to_string());

        let (session, interceptor) = interceptor(InterceptorSettings {
            static_headers,
            ..Default::default()
        });
        login(&session, "Bearer", "abc");

        let request = interceptor.decorate(RequestDescriptor::new(Method::GET, "/users"));
        assert_eq!(request.header("Authorization"), Some("Basic fixed"));
        assert_eq!(request.header(LANG_HEADER), Some("fr"));
        assert_eq!(request.header("x-client"), Some("admin"));
    }

    proptest! {
        #[test]
        fn prop_get_always_gains_cache_bust_key(
            params in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
        ) {
            let (_, interceptor) = interceptor(InterceptorSettings::default());
            let mut request = RequestDescriptor::new(Method::GET, "/items");
            request.params = params.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
            let original = request.clone();

            let decorated = interceptor.decorate(request);
            prop_assert!(!original.params.contains_key(CACHE_BUST_PARAM));
            prop_assert!(decorated.params.contains_key(CACHE_BUST_PARAM));
            for (key, value) in &original.params {
                prop_assert_eq!(decorated.params.get(key), Some(value));
            }
        }

        #[test]
        fn prop_auth_header_is_type_and_token(
            token_type in "[A-Za-z]{1,10}",
            access in "[A-Za-z0-9._-]{1,40}",
        ) {
            let (session, interceptor) = interceptor(InterceptorSettings::default());
            login(&session, &token_type, &access);

            let decorated = interceptor.decorate(RequestDescriptor::new(Method::DELETE, "/x"));
            let expected = format!("{} {}", token_type, access);
            prop_assert_eq!(decorated.header("Authorization"), Some(expected.as_str()));
        }
    }
}
