//! `denidin-whatsapp` — the messaging transport boundary. Parses inbound
//! Green-API-shaped webhooks into `IncomingMessage` and ships a
//! deterministic in-process `MessagingTransport` mock; no production
//! WhatsApp client is part of this crate.

pub mod error;
pub mod transport;
pub mod webhook;

pub use error::{Result, WhatsAppError};
pub use transport::InMemoryTransport;
pub use webhook::{parse_webhook, verify_signature, MessageData, SenderData, TextMessageData, WebhookPayload};
