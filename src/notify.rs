//! Notification delivery.
//!
//! The alert engine decides when to notify; this module decides how.
//! `Notifier` is the seam: the default implementation just logs (useful
//! on a bench with no channel configured), the webhook implementation
//! behind the `notify-webhook` feature posts to a configured endpoint,
//! and tests substitute a recording impl.

use anyhow::Result;

/// Delivery channel for alert notifications. Implementations own their
/// own retry policy; the caller treats a failure as logged-and-dropped.
pub trait Notifier: Send + Sync {
    /// Deliver an alert image with a short title.
    fn upload(&self, title: &str, jpeg: &[u8]) -> Result<()>;

    /// Deliver a plain text message (startup, shutdown, sensor trouble).
    fn post(&self, message: &str) -> Result<()>;
}

/// Logs what would have been sent. Default when no channel is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn upload(&self, title: &str, jpeg: &[u8]) -> Result<()> {
        log::info!("notify (log only): {} ({} bytes)", title, jpeg.len());
        Ok(())
    }

    fn post(&self, message: &str) -> Result<()> {
        log::info!("notify (log only): {}", message);
        Ok(())
    }
}

#[cfg(feature = "notify-webhook")]
pub use webhook::WebhookNotifier;

#[cfg(feature = "notify-webhook")]
mod webhook {
    use super::Notifier;
    use anyhow::{Context, Result};
    use std::time::Duration;

    /// Posts alerts to a single configured HTTP endpoint. Images go up as
    /// `image/jpeg` bodies with the title in a header, text as JSON.
    pub struct WebhookNotifier {
        endpoint: String,
        agent: ureq::Agent,
    }

    impl WebhookNotifier {
        pub fn new(endpoint: String) -> Self {
            let agent = ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(10))
                .build();
            Self { endpoint, agent }
        }
    }

    impl Notifier for WebhookNotifier {
        fn upload(&self, title: &str, jpeg: &[u8]) -> Result<()> {
            self.agent
                .post(&self.endpoint)
                .set("Content-Type", "image/jpeg")
                .set("X-Alert-Title", title)
                .send_bytes(jpeg)
                .with_context(|| format!("webhook upload '{}'", title))?;
            Ok(())
        }

        fn post(&self, message: &str) -> Result<()> {
            self.agent
                .post(&self.endpoint)
                .send_json(serde_json::json!({ "text": message }))
                .context("webhook post")?;
            Ok(())
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::Notifier;
    use anyhow::Result;
    use std::sync::Mutex;

    /// Records every delivery for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub uploads: Mutex<Vec<String>>,
        pub posts: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn upload(&self, title: &str, _jpeg: &[u8]) -> Result<()> {
            self.uploads
                .lock()
                .unwrap()
                .push(title.to_string());
            Ok(())
        }

        fn post(&self, message: &str) -> Result<()> {
            self.posts.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_notifier_never_fails() {
        let n = LogNotifier;
        assert!(n.upload("motion", &[0xFF, 0xD8]).is_ok());
        assert!(n.post("camera online").is_ok());
    }
}
