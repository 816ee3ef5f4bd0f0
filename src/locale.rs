// Locale resolution and request message catalog

use std::sync::Arc;

use crate::auth::{Session, LANG_KEY};

/// Message identifiers used by the client
pub mod keys {
    pub const ERROR: &str = "request.error";
    pub const NOT_FOUND: &str = "request.404";
    pub const SERVER_ERROR: &str = "request.500";
    pub const NO_RESPONSE: &str = "request.noResponse";
    pub const RELOGIN_TITLE: &str = "request.reLogin.title";
    pub const RELOGIN_INFO: &str = "request.reLogin.info";
    pub const RELOGIN_CONFIRM: &str = "request.reLogin.confirmButtonText";
    pub const RELOGIN_CANCEL: &str = "request.reLogin.cancelButtonText";
    pub const UNKNOWN_ERROR: &str = "request.unknownError";
    pub const REFRESHED_INFO: &str = "request.reRefresh.info";
}

/// Resolves a message identifier to display text
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str) -> String;
}

/// Resolves the language tag sent with every request
pub struct LocaleProvider {
    session: Arc<Session>,
    default_lang: String,
}

impl LocaleProvider {
    pub fn new(session: Arc<Session>, default_lang: impl Into<String>) -> Self {
        Self {
            session,
            default_lang: default_lang.into(),
        }
    }

    /// Language stored in the session, or the configured default
    pub fn current(&self) -> String {
        match self.session.entry(LANG_KEY) {
            Ok(Some(lang)) if !lang.is_empty() => lang,
            Ok(_) => self.default_lang.clone(),
            Err(e) => {
                tracing::warn!("Failed to read language from session: {}", e);
                self.default_lang.clone()
            }
        }
    }

    pub fn default_lang(&self) -> &str {
        &self.default_lang
    }
}

/// Built-in catalog following the active locale
pub struct Catalog {
    locale: Arc<LocaleProvider>,
}

impl Catalog {
    pub fn new(locale: Arc<LocaleProvider>) -> Self {
        Self { locale }
    }

    /// Look up a message for an explicit language. Unknown languages use English.
    pub fn lookup(lang: &str, key: &str) -> Option<&'static str> {
        match lang.to_lowercase().as_str() {
            "zh-cn" | "zh" => zh_cn(key),
            _ => en(key),
        }
    }
}

impl Translator for Catalog {
    /// Unknown keys translate to themselves
    fn translate(&self, key: &str) -> String {
        Catalog::lookup(&self.locale.current(), key)
            .unwrap_or(key)
            .to_string()
    }
}

fn en(key: &str) -> Option<&'static str> {
    let text = match key {
        keys::ERROR => "Request error",
        keys::NOT_FOUND => "The requested resource does not exist",
        keys::SERVER_ERROR => "Server error",
        keys::NO_RESPONSE => "Server not responding",
        keys::RELOGIN_TITLE => "Login expired",
        keys::RELOGIN_INFO => "Your session has expired. Please log in again.",
        keys::RELOGIN_CONFIRM => "Log in again",
        keys::RELOGIN_CANCEL => "Cancel",
        keys::UNKNOWN_ERROR => "Unknown error",
        keys::REFRESHED_INFO => "Your session was renewed automatically",
        _ => return None,
    };
    Some(text)
}

fn zh_cn(key: &str) -> Option<&'static str> {
    let text = match key {
        keys::ERROR => "请求错误",
        keys::NOT_FOUND => "正在请求不存在的服务器记录！",
        keys::SERVER_ERROR => "服务器发生错误！",
        keys::NO_RESPONSE => "请求服务器无响应！",
        keys::RELOGIN_TITLE => "无权限访问",
        keys::RELOGIN_INFO => "当前用户已被登出或无权限访问当前资源，请尝试重新登录后再操作。",
        keys::RELOGIN_CONFIRM => "重新登录",
        keys::RELOGIN_CANCEL => "取消",
        keys::UNKNOWN_ERROR => "未知错误",
        keys::REFRESHED_INFO => "登录凭证已自动更新",
        _ => return None,
    };
    Some(text)
}
