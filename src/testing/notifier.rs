use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::notify::Notifier;

/// A notifier that records URLs instead of calling them.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose calls are recorded and then fail.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, url: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());
        if self.fail {
            anyhow::bail!("webhook {url} unreachable");
        }
        Ok(())
    }
}
