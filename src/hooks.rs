// Host interfaces the client calls into
//
// Notification, confirmation and navigation belong to the embedding
// application. The client only talks to these traits.

use async_trait::async_trait;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Visual tone of a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Warning,
}

/// Labels and tone for a confirmation prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOptions {
    pub confirm_label: String,
    pub cancel_label: String,
    pub tone: Tone,
}

/// Fire-and-forget user notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Blocking yes/no question to the user
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// True when the user confirmed, false when they cancelled or dismissed
    async fn confirm(&self, message: &str, title: &str, options: &ConfirmOptions) -> bool;
}

/// Rebuilds client state from the persisted session
pub trait Navigator: Send + Sync {
    fn reload_current_view(&self);
}

/// Sends notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(title, "{}", message),
            Severity::Warning => tracing::warn!(title, "{}", message),
            Severity::Error => tracing::error!(title, "{}", message),
        }
    }
}

/// Asks on the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmer;

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, message: &str, title: &str, options: &ConfirmOptions) -> bool {
        let prompt = format!(
            "{}: {} [{} / {}]",
            title, message, options.confirm_label, options.cancel_label
        );

        let answer = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                tracing::warn!("Confirmation prompt failed, treating as cancel: {}", e);
                false
            }
            Err(e) => {
                tracing::warn!("Confirmation task failed, treating as cancel: {}", e);
                false
            }
        }
    }
}

/// Answers every prompt with a fixed value (non-interactive runs)
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, message: &str, title: &str, _options: &ConfirmOptions) -> bool {
        tracing::info!(title, answer = self.0, "Auto-answering prompt: {}", message);
        self.0
    }
}

/// Logs reload requests; for hosts without a view layer
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn reload_current_view(&self) {
        tracing::info!("Reloading current view from persisted session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_confirm() {
        let options = ConfirmOptions {
            confirm_label: "OK".to_string(),
            cancel_label: "Cancel".to_string(),
            tone: Tone::Warning,
        };
        assert!(AutoConfirm(true).confirm("m", "t", &options).await);
        assert!(!AutoConfirm(false).confirm("m", "t", &options).await);
    }
}
