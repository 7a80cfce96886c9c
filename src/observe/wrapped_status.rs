use anyhow::anyhow;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::message::content_format::ContentFormat;
use crate::observe::resource_handler::ResourceHandler;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Representation {
    Serialized { payload: Bytes, etag: Bytes },
    /// Serialization failed. The error is kept so that it can be reported to whoever reads this
    ///  representation, without failing the update that produced it.
    Failed(String),
}

/// The serialized forms of one status value, one per content format the resource supports.
///  These are computed once per update and then shared by all readers of that update.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceRepresentations {
    by_format: FxHashMap<ContentFormat, Representation>,
}

impl ResourceRepresentations {
    pub fn compute<T: 'static>(handler: &dyn ResourceHandler<T>, status: &T) -> ResourceRepresentations {
        let mut by_format = FxHashMap::default();

        for content_format in handler.content_formats() {
            let representation = match handler.serialize(status, content_format) {
                Ok(payload) => {
                    let etag = handler.compute_etag(status, content_format, &payload);
                    Representation::Serialized { payload, etag }
                }
                Err(e) => {
                    debug!("could not serialize status to {:?}: {}", content_format, e);
                    Representation::Failed(e.to_string())
                }
            };
            by_format.insert(content_format, representation);
        }

        ResourceRepresentations { by_format }
    }

    /// The payload and ETag for a content format, or the error that prevented serialization
    pub fn get(&self, content_format: ContentFormat) -> anyhow::Result<(&Bytes, &Bytes)> {
        match self.by_format.get(&content_format) {
            Some(Representation::Serialized { payload, etag }) => Ok((payload, etag)),
            Some(Representation::Failed(msg)) => Err(anyhow!("status could not be serialized to {:?}: {}", content_format, msg)),
            None => Err(anyhow!("unsupported content format {:?}", content_format)),
        }
    }
}

/// A read-only snapshot of a resource's status in one content format. All fields are taken
///  from the same update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WrappedResourceStatus {
    pub content: Bytes,
    pub content_format: ContentFormat,
    pub etag: Bytes,
    /// remaining freshness in seconds as of the moment the snapshot was taken
    pub max_age: u64,
    pub observe_sequence: u32,
}

impl WrappedResourceStatus {
    pub fn from_representations(representations: &ResourceRepresentations, content_format: ContentFormat, max_age: u64, observe_sequence: u32) -> anyhow::Result<WrappedResourceStatus> {
        let (content, etag) = representations.get(content_format)?;
        Ok(WrappedResourceStatus {
            content: content.clone(),
            content_format,
            etag: etag.clone(),
            max_age,
            observe_sequence,
        })
    }
}
