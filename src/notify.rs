//! Notification dispatch.
//!
//! The sentinel emits alerts through the [`Notifier`] trait; delivery
//! transports (mail, webhooks, IM bridges) live behind it.

/// Outbound notification sink. Implementations must be safe for concurrent
/// use; emission is best-effort and never surfaces errors to the caller.
pub trait Notifier: Send + Sync {
    /// Deliver `message` to the routing group identified by `tag`.
    ///
    /// `muteable` marks notifications the operator may silence without
    /// losing hard failures.
    fn send_notification(&self, tag: &str, message: &str, muteable: bool);
}

/// Notifier that writes alerts to the log. Default transport for
/// standalone deployments.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_notification(&self, tag: &str, message: &str, muteable: bool) {
        tracing::info!(tag = tag, muteable = muteable, "notification: {}", message);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String, bool)>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, msg, _)| msg.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_notification(&self, tag: &str, message: &str, muteable: bool) {
            self.sent
                .lock()
                .unwrap()
                .push((tag.to_string(), message.to_string(), muteable));
        }
    }
}
