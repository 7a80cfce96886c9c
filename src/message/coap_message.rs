use bytes::Bytes;

use crate::message::content_format::ContentFormat;
use crate::message::message_code::MessageCode;
use crate::message::message_type::MessageType;
use crate::message::token::Token;

pub type MessageId = u16;

/// Freshness lifetime in seconds that applies when a status is set without an explicit lifetime
///  (and the value a receiver assumes in the absence of a Max-Age option)
pub const MAX_AGE_DEFAULT: u64 = 60;

/// Max-Age is an option of up to 4 bytes
pub const MAX_AGE_MAX: u64 = u32::MAX as u64;

/// Observe sequence numbers are 24 bit values
pub const OBSERVE_SEQUENCE_MODULUS: u32 = 1 << 24;

/// The parts of a message that this engine reads or writes. Options that only matter for
///  routing or for the wire format are not represented.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoapMessage {
    pub message_type: MessageType,
    pub code: MessageCode,
    pub message_id: MessageId,
    pub token: Token,
    pub observe: Option<u32>,
    pub content_format: Option<ContentFormat>,
    pub etag: Option<Bytes>,
    pub max_age: Option<u64>,
    pub payload: Bytes,
}

impl CoapMessage {
    pub fn new(message_type: MessageType, code: MessageCode, message_id: MessageId, token: Token) -> CoapMessage {
        CoapMessage {
            message_type,
            code,
            message_id,
            token,
            observe: None,
            content_format: None,
            etag: None,
            max_age: None,
            payload: Bytes::new(),
        }
    }

    pub fn empty_ack(message_id: MessageId) -> CoapMessage {
        CoapMessage::new(MessageType::Acknowledgement, MessageCode::EMPTY, message_id, Token::EMPTY)
    }

    pub fn reset(message_id: MessageId) -> CoapMessage {
        CoapMessage::new(MessageType::Reset, MessageCode::EMPTY, message_id, Token::EMPTY)
    }

    pub fn with_payload(mut self, content_format: ContentFormat, payload: Bytes) -> CoapMessage {
        self.content_format = Some(content_format);
        self.payload = payload;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ack() {
        let ack = CoapMessage::empty_ack(17);
        assert_eq!(ack.message_type, MessageType::Acknowledgement);
        assert_eq!(ack.message_id, 17);
        assert!(ack.is_empty());
        assert!(ack.token.is_empty());
        assert_eq!(ack.observe, None);
    }

    #[test]
    fn test_reset() {
        let rst = CoapMessage::reset(3);
        assert_eq!(rst.message_type, MessageType::Reset);
        assert!(rst.is_empty());
    }

    #[test]
    fn test_with_payload() {
        let msg = CoapMessage::new(MessageType::NonConfirmable, MessageCode::CONTENT, 1, Token::from_u64(9))
            .with_payload(ContentFormat::TEXT_PLAIN_UTF8, Bytes::from_static(b"21.5"));
        assert_eq!(msg.content_format, Some(ContentFormat::TEXT_PLAIN_UTF8));
        assert_eq!(msg.payload.as_ref(), b"21.5");
        assert!(!msg.is_empty());
    }
}
