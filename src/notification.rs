//! User-facing notifications
//!
//! Screens report batch outcomes through a [`Notifier`]. The toast layer of
//! a real front end implements it; [`LogNotifier`] routes everything to the
//! log for headless runs.

/// Fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    fn notify_success(&self, message: &str);
    fn notify_warning(&self, message: &str);
    fn notify_error(&self, message: &str);
}

/// Notifier that writes to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_success(&self, message: &str) {
        log::info!("{}", message);
    }

    fn notify_warning(&self, message: &str) {
        log::warn!("{}", message);
    }

    fn notify_error(&self, message: &str) {
        log::error!("{}", truncate(message, 200));
    }
}

/// Trim long error bodies so a backend stack trace does not flood the output.
fn truncate(message: &str, max: usize) -> String {
    if message.chars().count() > max {
        let cut: String = message.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        message.to_string()
    }
}
