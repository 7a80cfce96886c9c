use std::fmt::{Debug, Formatter};

/// The numeric Content-Format registry value describing a payload's media type
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    pub const TEXT_PLAIN_UTF8: ContentFormat = ContentFormat(0);
    pub const APP_LINK_FORMAT: ContentFormat = ContentFormat(40);
    pub const APP_XML: ContentFormat = ContentFormat(41);
    pub const APP_OCTET_STREAM: ContentFormat = ContentFormat(42);
    pub const APP_EXI: ContentFormat = ContentFormat(47);
    pub const APP_JSON: ContentFormat = ContentFormat(50);
    pub const APP_CBOR: ContentFormat = ContentFormat(60);

    fn name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("text/plain;charset=utf-8"),
            40 => Some("application/link-format"),
            41 => Some("application/xml"),
            42 => Some("application/octet-stream"),
            47 => Some("application/exi"),
            50 => Some("application/json"),
            60 => Some("application/cbor"),
            _ => None,
        }
    }
}

impl Debug for ContentFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "ContentFormat({})", self.0),
        }
    }
}
