use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The four message types of the base protocol, with their on-the-wire values (2 bits).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    pub fn is_confirmable(&self) -> bool {
        *self == MessageType::Confirmable
    }

    /// ACK and RST are the two message types that answer a previous confirmable message
    pub fn is_response_to_confirmable(&self) -> bool {
        matches!(self, MessageType::Acknowledgement | MessageType::Reset)
    }
}
