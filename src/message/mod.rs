//! The message model shared by the reliability and observation layers. Encoding and decoding
//!  of messages is done elsewhere: this is the typed view the engine works with.

pub mod coap_message;
pub mod content_format;
pub mod message_code;
pub mod message_sender;
pub mod message_type;
pub mod token;
