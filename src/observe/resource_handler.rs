use std::net::SocketAddr;

use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use sha2::{Digest, Sha256};

use crate::message::content_format::ContentFormat;
use crate::message::message_type::MessageType;

/// ETags are 1 to 8 bytes
pub const MAX_ETAG_LEN: usize = 8;

/// Decides whether notifications to a given observer are sent confirmable or non-confirmable.
///  An observer's stored preference takes precedence over this.
#[cfg_attr(test, automock)]
pub trait NotificationPolicy: Send + Sync + 'static {
    fn message_type_for_notification(&self, remote_endpoint: SocketAddr) -> MessageType;
}

/// The application part of an observable resource: how its status is represented on the wire.
pub trait ResourceHandler<T>: NotificationPolicy {
    /// The content formats this resource can be serialized to. Representations for these
    ///  formats are computed eagerly on every status update.
    fn content_formats(&self) -> Vec<ContentFormat>;

    fn serialize(&self, status: &T, content_format: ContentFormat) -> anyhow::Result<Bytes>;

    /// The validator for one representation. This must be deterministic, and it should change
    ///  whenever the serialized representation changes.
    fn compute_etag(&self, _status: &T, _content_format: ContentFormat, serialized: &[u8]) -> Bytes {
        default_etag(serialized)
    }
}

/// The first [MAX_ETAG_LEN] bytes of the representation's SHA-256 digest
pub fn default_etag(serialized: &[u8]) -> Bytes {
    let digest = Sha256::digest(serialized);
    Bytes::copy_from_slice(&digest[..MAX_ETAG_LEN])
}
