//! Email provider that records instead of sending.

use crate::email::{EmailError, EmailMessage, EmailProvider};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Keeps every delivered message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmailProvider {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingEmailProvider {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make delivery fail (or succeed again).
    pub fn fail_deliveries(&self, fail: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.messages().clone()
    }

    /// Messages delivered to one address.
    #[must_use]
    pub fn sent_to(&self, to: &str) -> Vec<EmailMessage> {
        self.messages().iter().filter(|m| m.to == to).cloned().collect()
    }

    /// Link of the most recent message to `to` that carried one.
    #[must_use]
    pub fn last_link_to(&self, to: &str) -> Option<String> {
        self.messages()
            .iter()
            .rev()
            .filter(|m| m.to == to)
            .find_map(|m| m.link.clone())
    }

    fn messages(&self) -> MutexGuard<'_, Vec<EmailMessage>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailProvider {
    async fn deliver(&self, message: EmailMessage) -> Result<(), EmailError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(EmailError::Transport("relay unavailable".into()));
        }
        self.messages().push(message);
        Ok(())
    }
}
