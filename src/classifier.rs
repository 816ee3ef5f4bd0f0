// Failure classification
//
// Maps every failed transport result to exactly one taxonomy case plus the
// recovery action the coordinator should take for it.

use serde_json::Value;
use std::fmt;

/// Application codes carried by a 401 when the session is no longer valid
pub const SESSION_INVALID_CODES: [i64; 2] = [50002, 50003];

/// Message marker sent when the access token has expired
pub const UNAUTHENTICATED_MARKER: &str = "Unauthenticated";

/// Message marker sent when the refresh token itself is no longer accepted
pub const INVALID_REFRESH_MARKER: &str = "The refresh token is invalid";

/// Taxonomy case of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No response at all (connect failure, timeout, ...)
    NoResponse,
    NotFound,
    ServerError,
    /// Access token expired, a refresh can recover
    SilentRefreshable,
    /// Session is gone, the user must log in again
    SessionExpired,
    Unauthorized,
    UnknownError,
}

/// Whether forced logout asks the user first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutMode {
    Confirmed,
    Unconditional,
}

/// Side effect the recovery coordinator performs for a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Notify,
    SilentRefresh,
    ForcedLogout(LogoutMode),
}

/// Normalized outcome of a failed request, handed back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    /// HTTP status, absent for `NoResponse`
    pub status: Option<u16>,
    /// Server-provided message, if any
    pub message: Option<String>,
    pub action: RecoveryAction,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.category)?;
        if let Some(status) = self.status {
            write!(f, " (status {})", status)?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}

/// Raw failure as seen by the transport
#[derive(Debug, Clone)]
pub enum TransportFailure {
    /// The request never produced a response
    NoResponse { reason: String },
    /// The server answered with a non-success status
    Response { status: u16, body: Value },
}

/// Explicit reason tag an error body may carry in its `reason` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerReason {
    Unauthenticated,
    InvalidRefreshToken,
}

impl ServerReason {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "unauthenticated" => Some(ServerReason::Unauthenticated),
            "invalid_refresh_token" => Some(ServerReason::InvalidRefreshToken),
            _ => None,
        }
    }

    /// Prefer the explicit tag. Substring matching on the message only exists
    /// for servers that do not send one yet.
    fn detect(body: &Value, message: Option<&str>) -> Option<Self> {
        if let Some(reason) = body
            .get("reason")
            .and_then(Value::as_str)
            .and_then(Self::from_tag)
        {
            return Some(reason);
        }

        let message = message?;
        if message.contains(UNAUTHENTICATED_MARKER) {
            Some(ServerReason::Unauthenticated)
        } else if message.contains(INVALID_REFRESH_MARKER) {
            Some(ServerReason::InvalidRefreshToken)
        } else {
            None
        }
    }
}

/// Human-readable `message` of an error body, when it is a string
fn body_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Application code nested as `message.code` (or top-level `code`)
fn body_code(body: &Value) -> Option<i64> {
    body.get("message")
        .and_then(|m| m.get("code"))
        .or_else(|| body.get("code"))
        .and_then(Value::as_i64)
}

/// Classify a failed transport result
pub fn classify(failure: &TransportFailure) -> ClassifiedError {
    let (status, body) = match failure {
        TransportFailure::NoResponse { .. } => {
            return ClassifiedError {
                category: ErrorCategory::NoResponse,
                status: None,
                message: None,
                action: RecoveryAction::Notify,
            }
        }
        TransportFailure::Response { status, body } => (*status, body),
    };

    let message = body_message(body);

    let (category, action) = match status {
        404 => (ErrorCategory::NotFound, RecoveryAction::Notify),
        500 => match ServerReason::detect(body, message.as_deref()) {
            Some(ServerReason::Unauthenticated) => (
                ErrorCategory::SilentRefreshable,
                RecoveryAction::SilentRefresh,
            ),
            Some(ServerReason::InvalidRefreshToken) => (
                ErrorCategory::SessionExpired,
                RecoveryAction::ForcedLogout(LogoutMode::Unconditional),
            ),
            None => (ErrorCategory::ServerError, RecoveryAction::Notify),
        },
        401 => match body_code(body) {
            Some(code) if SESSION_INVALID_CODES.contains(&code) => (
                ErrorCategory::SessionExpired,
                RecoveryAction::ForcedLogout(LogoutMode::Confirmed),
            ),
            _ => (ErrorCategory::Unauthorized, RecoveryAction::Notify),
        },
        _ => (ErrorCategory::UnknownError, RecoveryAction::Notify),
    };

    ClassifiedError {
        category,
        status: Some(status),
        message,
        action,
    }
}
