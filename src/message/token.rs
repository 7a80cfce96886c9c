use std::fmt::{Debug, Formatter};
use anyhow::bail;

/// The token correlates requests and responses (and notifications) independently of the
///  message id. It has between 0 and 8 bytes, and an empty token is a regular value.
///
/// NB: Unused trailing bytes are always zero, so the derived equality and hash only depend on
///      the significant bytes
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Token {
    len: u8,
    bytes: [u8; Token::MAX_LEN],
}

impl Token {
    pub const MAX_LEN: usize = 8;

    pub const EMPTY: Token = Token { len: 0, bytes: [0; Token::MAX_LEN] };

    pub fn try_new(bytes: &[u8]) -> anyhow::Result<Token> {
        if bytes.len() > Self::MAX_LEN {
            bail!("token has {} bytes, the maximum is {}", bytes.len(), Self::MAX_LEN);
        }

        let mut result = Token::EMPTY;
        result.bytes[..bytes.len()].copy_from_slice(bytes);
        result.len = bytes.len() as u8;
        Ok(result)
    }

    pub fn from_u64(value: u64) -> Token {
        let bytes = value.to_be_bytes();
        let first_significant = bytes.iter()
            .position(|&b| b != 0)
            .unwrap_or(bytes.len());

        let mut result = Token::EMPTY;
        let significant = &bytes[first_significant..];
        result.bytes[..significant.len()].copy_from_slice(significant);
        result.len = significant.len() as u8;
        result
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(")?;
        for b in self.as_bytes() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}
