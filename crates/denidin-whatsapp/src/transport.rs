use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use denidin_agent::{IncomingMessage, MessagingTransport, TransportError};

/// Deterministic in-process `MessagingTransport`. Records every reply per chat so integration tests and
/// `denidin-gateway`'s default wiring can assert on delivery without a real
/// Green API account.
#[derive(Default)]
pub struct InMemoryTransport {
    sent: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reply sent to `chat_id`, oldest first.
    pub fn sent_to(&self, chat_id: &str) -> Vec<String> {
        self.sent.lock().unwrap().get(chat_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl MessagingTransport for InMemoryTransport {
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), TransportError> {
        info!("replying to chat {}: {} chars", message.chat_id, text.len());
        self.sent
            .lock()
            .unwrap()
            .entry(message.chat_id.clone())
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}
