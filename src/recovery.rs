// Recovery protocols run after a failure has been classified
//
// Recovery is a side effect: the caller still receives the classified
// rejection after `handle` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{Session, TokenRefresher};
use crate::classifier::{ClassifiedError, ErrorCategory, LogoutMode, RecoveryAction};
use crate::hooks::{ConfirmOptions, Confirmer, Navigator, Notifier, Severity, Tone};
use crate::locale::{keys, Translator};

/// Host-side collaborators used during recovery
#[derive(Clone)]
pub struct Hooks {
    pub notifier: Arc<dyn Notifier>,
    pub confirmer: Arc<dyn Confirmer>,
    pub navigator: Arc<dyn Navigator>,
    pub translator: Arc<dyn Translator>,
}

/// Result of a silent refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new token set was stored
    Refreshed,
    /// Another request already replaced the token set this one was sent with
    AlreadyRefreshed,
    /// No new token set; a failed refresh call escalates to a confirmed
    /// forced logout
    Failed,
}

/// Result of a forced logout attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    Cleared,
    Declined,
    /// The store could not be cleared
    Failed,
}

/// What recovery needs to know about a request, captured when it was sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendContext {
    /// Access token the request carried, if any
    pub access_token: Option<String>,
    /// Refresh attempts finished before the request went out
    pub refresh_generation: u64,
}

/// Executes silent refresh and forced logout
pub struct RecoveryCoordinator {
    session: Arc<Session>,
    refresher: TokenRefresher,
    hooks: Hooks,
    /// Serializes refreshes so only one refresh call is in flight
    refresh_lock: Mutex<()>,
    /// Bumped under `refresh_lock` each time a refresh attempt finishes
    refresh_generation: AtomicU64,
}

impl RecoveryCoordinator {
    pub fn new(session: Arc<Session>, refresher: TokenRefresher, hooks: Hooks) -> Self {
        Self {
            session,
            refresher,
            hooks,
            refresh_lock: Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Snapshot taken right before a request is sent
    pub fn send_context(&self) -> SendContext {
        let access_token = match self.session.token_set() {
            Ok(token_set) => token_set.map(|token_set| token_set.access_token),
            Err(e) => {
                tracing::warn!("Failed to read token set: {}", e);
                None
            }
        };
        SendContext {
            access_token,
            refresh_generation: self.refresh_generation.load(Ordering::SeqCst),
        }
    }

    /// React to a classified failure of a request sent under `sent`
    pub async fn handle(&self, err: &ClassifiedError, sent: &SendContext) {
        tracing::warn!(
            category = ?err.category,
            status = ?err.status,
            message = ?err.message,
            "Request failed"
        );

        match err.action {
            RecoveryAction::Notify => self.notify_failure(err),
            RecoveryAction::SilentRefresh => {
                self.silent_refresh(sent).await;
            }
            RecoveryAction::ForcedLogout(mode) => {
                self.forced_logout(mode).await;
            }
        }
    }

    fn notify_failure(&self, err: &ClassifiedError) {
        let t = &self.hooks.translator;
        self.hooks.notifier.notify(
            &t.translate(keys::ERROR),
            &failure_message(err, t.as_ref()),
            Severity::Error,
        );
    }

    /// Replace the whole token set using the stored refresh token.
    ///
    /// Requests that were in flight during an attempt share its outcome: they
    /// neither call the endpoint again nor prompt again. The re-login prompt
    /// after a failed attempt runs once the lock is released.
    pub async fn silent_refresh(&self, sent: &SendContext) -> RefreshOutcome {
        let guard = self.refresh_lock.lock().await;

        let current = match self.session.token_set() {
            Ok(current) => current,
            Err(e) => {
                tracing::error!("Failed to read token set for refresh: {}", e);
                None
            }
        };

        if let Some(ref current) = current {
            if sent.access_token.as_deref() != Some(current.access_token.as_str()) {
                tracing::debug!("Token set already replaced since the request was sent");
                return RefreshOutcome::AlreadyRefreshed;
            }
        }

        if self.refresh_generation.load(Ordering::SeqCst) != sent.refresh_generation {
            tracing::debug!("Refresh attempt for this token set already failed, skipping");
            return RefreshOutcome::Failed;
        }

        let Some(current) = current else {
            if sent.access_token.is_some() {
                // Session was cleared while this request was in flight
                tracing::debug!("Session already cleared, skipping refresh");
                return RefreshOutcome::Failed;
            }
            tracing::warn!("No refresh token stored, cannot refresh silently");
            self.refresh_generation.fetch_add(1, Ordering::SeqCst);
            drop(guard);
            self.forced_logout(LogoutMode::Confirmed).await;
            return RefreshOutcome::Failed;
        };

        let refreshed = self.refresher.refresh(&current.refresh_token).await;
        let stored = refreshed.and_then(|token_set| {
            self.session
                .replace_token_set(&token_set)
                .map_err(|e| anyhow::anyhow!("Failed to store refreshed token set: {}", e))
        });
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        if let Err(e) = stored {
            tracing::error!("Silent refresh failed, asking user to log in again: {:#}", e);
            self.forced_logout(LogoutMode::Confirmed).await;
            return RefreshOutcome::Failed;
        }

        let t = &self.hooks.translator;
        self.hooks.notifier.notify(
            &t.translate(keys::ERROR),
            &t.translate(keys::REFRESHED_INFO),
            Severity::Info,
        );

        RefreshOutcome::Refreshed
    }

    /// Clear the session and reload, asking first in `Confirmed` mode.
    /// Safe to call on an already cleared session.
    pub async fn forced_logout(&self, mode: LogoutMode) -> LogoutOutcome {
        if mode == LogoutMode::Confirmed {
            let t = &self.hooks.translator;
            let options = ConfirmOptions {
                confirm_label: t.translate(keys::RELOGIN_CONFIRM),
                cancel_label: t.translate(keys::RELOGIN_CANCEL),
                tone: Tone::Warning,
            };
            let confirmed = self
                .hooks
                .confirmer
                .confirm(
                    &t.translate(keys::RELOGIN_INFO),
                    &t.translate(keys::RELOGIN_TITLE),
                    &options,
                )
                .await;

            if !confirmed {
                tracing::info!("User declined to log in again, session kept");
                return LogoutOutcome::Declined;
            }
        }

        if let Err(e) = self.session.clear() {
            tracing::error!("Failed to clear session: {}", e);
            return LogoutOutcome::Failed;
        }

        tracing::info!(?mode, "Forced logout, reloading view");
        self.hooks.navigator.reload_current_view();
        LogoutOutcome::Cleared
    }
}

/// Notification text for a failure that is only reported
pub fn failure_message(err: &ClassifiedError, t: &dyn Translator) -> String {
    let status = err.status.unwrap_or_default();
    match err.category {
        ErrorCategory::NoResponse => t.translate(keys::NO_RESPONSE),
        ErrorCategory::NotFound => format!("Status:404, {}", t.translate(keys::NOT_FOUND)),
        ErrorCategory::ServerError => err
            .message
            .clone()
            .unwrap_or_else(|| format!("Status:500, {}", t.translate(keys::SERVER_ERROR))),
        _ => err.message.clone().unwrap_or_else(|| {
            format!("Status:{}, {}!", status, t.translate(keys::UNKNOWN_ERROR))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStore, TokenSet, SESSION_ENTRY_KEYS};
    use crate::classifier::{classify, TransportFailure};
    use crate::interceptor::{InterceptorSettings, RequestInterceptor};
    use crate::locale::LocaleProvider;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use reqwest::{Client, Url};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct EchoTranslator;

    impl Translator for EchoTranslator {
        fn translate(&self, key: &str) -> String {
            key.to_string()
        }
    }

    #[derive(Default)]
    struct Recorder {
        notes: StdMutex<Vec<(String, Severity)>>,
        prompts: AtomicUsize,
        reloads: AtomicUsize,
        answer: bool,
    }

    impl Notifier for Recorder {
        fn notify(&self, _title: &str, message: &str, severity: Severity) {
            self.notes
                .lock()
                .unwrap()
                .push((message.to_string(), severity));
        }
    }

    #[async_trait]
    impl Confirmer for Recorder {
        async fn confirm(&self, _m: &str, _t: &str, options: &ConfirmOptions) -> bool {
            assert_eq!(options.tone, Tone::Warning);
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    impl Navigator for Recorder {
        fn reload_current_view(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(answer: bool, refresh_url: &str) -> (Arc<Recorder>, Arc<Session>, RecoveryCoordinator) {
        let recorder = Arc::new(Recorder {
            answer,
            ..Default::default()
        });
        let session = Arc::new(Session::new(Arc::new(MemoryStore::new()), "app"));
        session
            .replace_token_set(&TokenSet {
                access_token: "a1".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Utc::now() + Duration::minutes(5),
                refresh_token: "r1".to_string(),
            })
            .unwrap();
        for name in SESSION_ENTRY_KEYS {
            session.set_entry(name, "cached").unwrap();
        }

        let hooks = Hooks {
            notifier: recorder.clone(),
            confirmer: recorder.clone(),
            navigator: recorder.clone(),
            translator: Arc::new(EchoTranslator),
        };
        let locale = Arc::new(LocaleProvider::new(session.clone(), "en"));
        let interceptor = Arc::new(RequestInterceptor::new(
            session.clone(),
            locale,
            InterceptorSettings::default(),
        ));
        let refresher =
            TokenRefresher::new(Client::new(), Url::parse(refresh_url).unwrap(), interceptor);
        (
            recorder,
            session.clone(),
            RecoveryCoordinator::new(session, refresher, hooks),
        )
    }

    #[test]
    fn test_failure_messages() {
        let t = EchoTranslator;
        let err = classify(&TransportFailure::Response {
            status: 404,
            body: json!({}),
        });
        assert_eq!(failure_message(&err, &t), "Status:404, request.404");

        let err = classify(&TransportFailure::Response {
            status: 500,
            body: json!({}),
        });
        assert_eq!(failure_message(&err, &t), "Status:500, request.500");

        let err = classify(&TransportFailure::Response {
            status: 500,
            body: json!({ "message": "boom" }),
        });
        assert_eq!(failure_message(&err, &t), "boom");

        let err = classify(&TransportFailure::Response {
            status: 403,
            body: json!({}),
        });
        assert_eq!(failure_message(&err, &t), "Status:403, request.unknownError!");

        let err = classify(&TransportFailure::NoResponse {
            reason: "refused".to_string(),
        });
        assert_eq!(failure_message(&err, &t), "request.noResponse");
    }

    #[tokio::test]
    async fn test_notify_only_leaves_session_alone() {
        let (recorder, session, coordinator) = setup(true, "http://127.0.0.1:9/refresh");
        let err = classify(&TransportFailure::Response {
            status: 404,
            body: json!({}),
        });
        coordinator.handle(&err, &coordinator.send_context()).await;

        let notes = recorder.notes.lock().unwrap().clone();
        assert_eq!(notes, vec![("Status:404, request.404".to_string(), Severity::Error)]);
        assert!(session.token_set().unwrap().is_some());
        assert_eq!(recorder.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirmed_logout_declined() {
        let (recorder, session, coordinator) = setup(false, "http://127.0.0.1:9/refresh");
        let before = session.token_set().unwrap();

        let outcome = coordinator.forced_logout(LogoutMode::Confirmed).await;
        assert_eq!(outcome, LogoutOutcome::Declined);
        assert_eq!(session.token_set().unwrap(), before);
        assert_eq!(recorder.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirmed_logout_accepted_twice() {
        let (recorder, session, coordinator) = setup(true, "http://127.0.0.1:9/refresh");

        let outcome = coordinator.forced_logout(LogoutMode::Confirmed).await;
        assert_eq!(outcome, LogoutOutcome::Cleared);
        assert!(session.is_empty().unwrap());

        let outcome = coordinator.forced_logout(LogoutMode::Confirmed).await;
        assert_eq!(outcome, LogoutOutcome::Cleared);
        assert!(session.is_empty().unwrap());

        assert_eq!(recorder.prompts.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unconditional_logout_skips_prompt() {
        let (recorder, session, coordinator) = setup(false, "http://127.0.0.1:9/refresh");

        let outcome = coordinator.forced_logout(LogoutMode::Unconditional).await;
        assert_eq!(outcome, LogoutOutcome::Cleared);
        assert!(session.is_empty().unwrap());
        assert_eq!(recorder.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_skipped_when_token_already_replaced() {
        let (_, _, coordinator) = setup(true, "http://127.0.0.1:9/refresh");
        let sent = SendContext {
            access_token: Some("stale-token".to_string()),
            refresh_generation: 0,
        };
        let outcome = coordinator.silent_refresh(&sent).await;
        assert_eq!(outcome, RefreshOutcome::AlreadyRefreshed);
    }

    #[tokio::test]
    async fn test_refresh_success_replaces_token_set() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(
                json!({
                    "access_token": "a2",
                    "expires_in": 3600,
                    "refresh_token": "r2",
                    "token_type": "Bearer"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let (recorder, session, coordinator) =
            setup(true, &format!("{}/auth/refresh", server.url()));

        let err = classify(&TransportFailure::Response {
            status: 500,
            body: json!({ "message": "Unauthenticated." }),
        });
        coordinator.handle(&err, &coordinator.send_context()).await;
        mock.assert_async().await;

        let stored = session.token_set().unwrap().unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token, "r2");
        let notes = recorder.notes.lock().unwrap().clone();
        assert_eq!(
            notes,
            vec![("request.reRefresh.info".to_string(), Severity::Info)]
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_escalates_to_confirmed_logout() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(500)
            .with_body(r#"{"message":"The refresh token is invalid."}"#)
            .create_async()
            .await;

        let (recorder, session, coordinator) =
            setup(true, &format!("{}/auth/refresh", server.url()));

        let outcome = coordinator.silent_refresh(&coordinator.send_context()).await;
        assert_eq!(outcome, RefreshOutcome::Failed);
        assert_eq!(recorder.prompts.load(Ordering::SeqCst), 1);
        assert!(session.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_failure_prompts_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .with_body(r#"{"message":"The refresh token is invalid."}"#)
            .expect(1)
            .create_async()
            .await;

        let (recorder, session, coordinator) =
            setup(false, &format!("{}/auth/refresh", server.url()));
        let before = session.token_set().unwrap();

        // All three were in flight before the attempt finished
        let sent = coordinator.send_context();
        let (a, b, c) = tokio::join!(
            coordinator.silent_refresh(&sent),
            coordinator.silent_refresh(&sent),
            coordinator.silent_refresh(&sent),
        );
        mock.assert_async().await;

        assert_eq!([a, b, c], [RefreshOutcome::Failed; 3]);
        assert_eq!(recorder.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(session.token_set().unwrap(), before);
    }

    #[tokio::test]
    async fn test_request_sent_after_failed_refresh_tries_again() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let (recorder, _, coordinator) =
            setup(false, &format!("{}/auth/refresh", server.url()));

        let first = coordinator.send_context();
        assert_eq!(coordinator.silent_refresh(&first).await, RefreshOutcome::Failed);

        let second = coordinator.send_context();
        assert_ne!(first.refresh_generation, second.refresh_generation);
        assert_eq!(coordinator.silent_refresh(&second).await, RefreshOutcome::Failed);

        mock.assert_async().await;
        assert_eq!(recorder.prompts.load(Ordering::SeqCst), 2);
    }
}
