use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use denidin_agent::{IncomingMessage, MessageKind};

use crate::error::{Result, WhatsAppError};

type HmacSha256 = Hmac<Sha256>;

/// A Green-API-shaped incoming webhook payload.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "idMessage", default)]
    pub id_message: Option<String>,
    #[serde(rename = "messageData")]
    pub message_data: MessageData,
    #[serde(rename = "senderData")]
    pub sender_data: SenderData,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MessageData {
    #[serde(rename = "typeMessage")]
    pub type_message: String,
    #[serde(rename = "textMessageData", default)]
    pub text_message_data: Option<TextMessageData>,
}

#[derive(Debug, Deserialize)]
pub struct TextMessageData {
    #[serde(rename = "textMessage", default)]
    pub text_message: String,
}

#[derive(Debug, Deserialize)]
pub struct SenderData {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub sender: String,
}

/// Maps a Green-API `typeMessage` string to this crate's transport-agnostic
/// `MessageKind`. Anything other than `textMessage` is
/// either a recognised-but-unsupported media kind or flatly unsupported.
fn message_kind(type_message: &str) -> MessageKind {
    match type_message {
        "textMessage" => MessageKind::Text,
        "imageMessage" => MessageKind::Image,
        "documentMessage" => MessageKind::Document,
        "audioMessage" => MessageKind::Audio,
        _ => MessageKind::Unsupported,
    }
}

/// `1234567890-5678901234@g.us` denotes a group chat; `...@c.us` a 1-on-1.
fn is_group_chat(chat_id: &str) -> bool {
    chat_id.ends_with("@g.us")
}

/// Verifies a `sha256=<hex>` HMAC signature over the raw webhook body.
/// Deployments that configure a webhook secret should call this before
/// `parse_webhook` so a forged delivery is rejected before it ever reaches
/// `MessagePipeline`.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<()> {
    let sig_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| WhatsAppError::Unauthorized("malformed signature header".to_string()))?;

    let expected = hex::decode(sig_hex)
        .map_err(|_| WhatsAppError::Unauthorized("signature is not valid hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WhatsAppError::Unauthorized("invalid HMAC key length".to_string()))?;
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| WhatsAppError::Unauthorized("signature mismatch".to_string()))
}

/// Parses a webhook payload into a normalised `IncomingMessage`. `id` is freshly minted rather than taken from
/// `idMessage` when absent, matching `WhatsAppMessage.from_notification`'s
/// own per-receipt UUID.
pub fn parse_webhook(payload: &WebhookPayload) -> Result<IncomingMessage> {
    let kind = message_kind(&payload.message_data.type_message);
    let text = payload
        .message_data
        .text_message_data
        .as_ref()
        .map(|d| d.text_message.clone())
        .unwrap_or_default();

    if payload.sender_data.chat_id.is_empty() {
        return Err(WhatsAppError::Malformed("missing senderData.chatId".to_string()));
    }

    let timestamp = payload
        .timestamp
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Ok(IncomingMessage {
        id: payload.id_message.clone().unwrap_or_else(denidin_core::ids::new_id),
        chat_id: payload.sender_data.chat_id.clone(),
        sender: payload.sender_data.sender.clone(),
        text,
        kind,
        timestamp,
        is_group: is_group_chat(&payload.sender_data.chat_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_payload(chat_id: &str) -> WebhookPayload {
        WebhookPayload {
            id_message: None,
            message_data: MessageData {
                type_message: "textMessage".to_string(),
                text_message_data: Some(TextMessageData {
                    text_message: "Hello, how are you?".to_string(),
                }),
            },
            sender_data: SenderData {
                chat_id: chat_id.to_string(),
                sender: "1234567890@c.us".to_string(),
            },
            timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn parses_private_text_message() {
        let message = parse_webhook(&text_payload("1234567890@c.us")).unwrap();
        assert_eq!(message.text, "Hello, how are you?");
        assert_eq!(message.kind, MessageKind::Text);
        assert!(!message.is_group);
    }

    #[test]
    fn detects_group_chat_from_suffix() {
        let message = parse_webhook(&text_payload("1234567890-5678901234@g.us")).unwrap();
        assert!(message.is_group);
    }

    #[test]
    fn unsupported_type_maps_to_unsupported_kind() {
        let mut payload = text_payload("1234567890@c.us");
        payload.message_data.type_message = "videoMessage".to_string();
        let message = parse_webhook(&payload).unwrap();
        assert_eq!(message.kind, MessageKind::Unsupported);
    }

    #[test]
    fn media_types_map_to_their_own_kind() {
        let mut payload = text_payload("1234567890@c.us");
        payload.message_data.type_message = "imageMessage".to_string();
        assert_eq!(parse_webhook(&payload).unwrap().kind, MessageKind::Image);
    }

    #[test]
    fn missing_chat_id_is_malformed() {
        let mut payload = text_payload("");
        payload.sender_data.chat_id = String::new();
        assert!(matches!(parse_webhook(&payload), Err(WhatsAppError::Malformed(_))));
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("top-secret", body);
        assert!(verify_signature("top-secret", body, &header).is_ok());
    }

    #[test]
    fn rejects_a_mismatched_signature() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("top-secret", body);
        assert!(matches!(
            verify_signature("wrong-secret", body, &header),
            Err(WhatsAppError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("top-secret", body);
        let tampered = br#"{"hello":"mallory"}"#;
        assert!(matches!(
            verify_signature("top-secret", tampered, &header),
            Err(WhatsAppError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_a_header_missing_the_prefix() {
        assert!(matches!(
            verify_signature("top-secret", b"body", "deadbeef"),
            Err(WhatsAppError::Unauthorized(_))
        ));
    }
}
