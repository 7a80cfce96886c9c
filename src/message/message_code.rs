use std::fmt::{Debug, Formatter};

/// A message code in its `class.detail` representation: 3 bits class, 5 bits detail.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MessageCode(u8);

impl MessageCode {
    pub const EMPTY: MessageCode = MessageCode::new(0, 0);

    pub const CONTENT: MessageCode = MessageCode::new(2, 5);

    pub const INTERNAL_SERVER_ERROR: MessageCode = MessageCode::new(5, 0);
    pub const SERVICE_UNAVAILABLE: MessageCode = MessageCode::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> MessageCode {
        MessageCode(((class & 0x07) << 5) | (detail & 0x1f))
    }

    pub fn to_raw(&self) -> u8 {
        self.0
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Debug for MessageCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::empty(MessageCode::EMPTY, 0, "0.00")]
    #[case::content(MessageCode::CONTENT, 69, "2.05")]
    #[case::internal_server_error(MessageCode::INTERNAL_SERVER_ERROR, 160, "5.00")]
    #[case::service_unavailable(MessageCode::SERVICE_UNAVAILABLE, 163, "5.03")]
    fn test_raw_and_debug(#[case] code: MessageCode, #[case] raw: u8, #[case] debug: &str) {
        assert_eq!(code.to_raw(), raw);
        assert_eq!(MessageCode::new(code.class(), code.detail()), code);
        assert_eq!(format!("{:?}", code), debug);
    }

    #[test]
    fn test_empty() {
        assert!(MessageCode::EMPTY.is_empty());
        assert!(!MessageCode::CONTENT.is_empty());
    }
}
