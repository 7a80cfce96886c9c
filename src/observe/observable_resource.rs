use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::message::coap_message::{MAX_AGE_DEFAULT, MAX_AGE_MAX, OBSERVE_SEQUENCE_MODULUS};
use crate::message::content_format::ContentFormat;
use crate::observe::resource_handler::{NotificationPolicy, ResourceHandler};
use crate::observe::wrapped_status::{ResourceRepresentations, WrappedResourceStatus};

/// Emitted exactly once per status update (and once on shutdown) for the notification
///  dispatcher. A status change carries that update's representations, so a notification always
///  reflects the update that triggered it.
pub struct ResourceUpdate {
    pub path: String,
    pub kind: ResourceUpdateKind,
    pub policy: Arc<dyn NotificationPolicy>,
}

impl Debug for ResourceUpdate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResourceUpdate{{path:{:?}, kind:{:?}}}", self.path, self.kind)
    }
}

#[derive(Debug)]
pub enum ResourceUpdateKind {
    StatusChanged(StatusChangedData),
    /// the resource goes away, observers should stop expecting notifications
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct StatusChangedData {
    pub representations: Arc<ResourceRepresentations>,
    pub expiry: Instant,
    pub observe_sequence: u32,
}

impl StatusChangedData {
    /// remaining freshness of this update in seconds, as of now
    pub fn max_age(&self) -> u64 {
        remaining_seconds(self.expiry)
    }

    pub fn wrapped_status(&self, content_format: ContentFormat) -> anyhow::Result<WrappedResourceStatus> {
        WrappedResourceStatus::from_representations(&self.representations, content_format, self.max_age(), self.observe_sequence)
    }
}

fn remaining_seconds(expiry: Instant) -> u64 {
    expiry.saturating_duration_since(Instant::now()).as_secs()
}

fn expiry_for(lifetime_seconds: u64) -> Instant {
    Instant::now() + Duration::from_secs(lifetime_seconds.min(MAX_AGE_MAX))
}


/// The current status of one observable resource together with its freshness deadline and its
///  serialized representations.
///
/// Serialization happens before the write lock is taken, so readers are only ever blocked for
///  the duration of an assignment. Failures to serialize for a particular content format do not
///  fail the update: they are reported to whoever reads that representation.
///
/// Resources are identified by their path: equality and hashing ignore everything else.
pub struct ObservableResource<T> {
    path: String,
    handler: Arc<dyn ResourceHandler<T>>,
    policy: Arc<dyn NotificationPolicy>,
    inner: RwLock<ResourceInner<T>>,
    updates: mpsc::UnboundedSender<ResourceUpdate>,
}

struct ResourceInner<T> {
    status: T,
    expiry: Instant,
    representations: Arc<ResourceRepresentations>,
    observe_sequence: u32,
}

impl<T: Clone + Send + Sync + 'static> ObservableResource<T> {
    pub fn new<H: ResourceHandler<T>>(path: impl Into<String>, handler: Arc<H>, initial_status: T, lifetime_seconds: u64, updates: mpsc::UnboundedSender<ResourceUpdate>) -> ObservableResource<T> {
        let representations = ResourceRepresentations::compute(handler.as_ref(), &initial_status);
        let policy: Arc<dyn NotificationPolicy> = handler.clone();

        ObservableResource {
            path: path.into(),
            handler,
            policy,
            inner: RwLock::new(ResourceInner {
                status: initial_status,
                expiry: expiry_for(lifetime_seconds),
                representations: Arc::new(representations),
                observe_sequence: 0,
            }),
            updates,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_formats(&self) -> Vec<ContentFormat> {
        self.handler.content_formats()
    }

    /// Replace the status, and notify observers. Every call yields its own notification, there
    ///  is no coalescing of rapid updates.
    pub async fn set_status(&self, status: T, lifetime_seconds: u64) {
        let representations = Arc::new(ResourceRepresentations::compute(self.handler.as_ref(), &status));

        let mut inner = self.inner.write().await;
        inner.status = status;
        inner.expiry = expiry_for(lifetime_seconds);
        inner.representations = representations.clone();
        inner.observe_sequence = (inner.observe_sequence + 1) % OBSERVE_SEQUENCE_MODULUS;

        trace!("status of {} updated, observe sequence {}", self.path, inner.observe_sequence);
        // enqueued under the lock so that events are in update order
        self.emit(ResourceUpdateKind::StatusChanged(StatusChangedData {
            representations,
            expiry: inner.expiry,
            observe_sequence: inner.observe_sequence,
        }));
    }

    pub async fn set_status_default_lifetime(&self, status: T) {
        self.set_status(status, MAX_AGE_DEFAULT).await
    }

    pub async fn status(&self) -> T {
        self.inner.read().await
            .status
            .clone()
    }

    /// The remaining freshness of the current status in seconds; never negative, and never
    ///  increasing between updates
    pub async fn max_age(&self) -> u64 {
        remaining_seconds(self.inner.read().await.expiry)
    }

    pub async fn wrapped_status(&self, content_format: ContentFormat) -> anyhow::Result<WrappedResourceStatus> {
        let inner = self.inner.read().await;
        WrappedResourceStatus::from_representations(&inner.representations, content_format, remaining_seconds(inner.expiry), inner.observe_sequence)
    }

    pub async fn serialized_status(&self, content_format: ContentFormat) -> anyhow::Result<Bytes> {
        let inner = self.inner.read().await;
        let (payload, _) = inner.representations.get(content_format)?;
        Ok(payload.clone())
    }

    pub async fn etag(&self, content_format: ContentFormat) -> anyhow::Result<Bytes> {
        let inner = self.inner.read().await;
        let (_, etag) = inner.representations.get(content_format)?;
        Ok(etag.clone())
    }

    /// Tell observers that this resource is going away. The status is left unchanged.
    pub async fn prepare_shutdown(&self) {
        let _inner = self.inner.read().await;
        debug!("shutting down resource {}", self.path);
        self.emit(ResourceUpdateKind::ShuttingDown);
    }

    fn emit(&self, kind: ResourceUpdateKind) {
        let update = ResourceUpdate {
            path: self.path.clone(),
            kind,
            policy: self.policy.clone(),
        };
        if self.updates.send(update).is_err() {
            debug!("no dispatcher for updates of {} - dropping update", self.path);
        }
    }
}

impl<T> Debug for ObservableResource<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObservableResource{{path:{:?}}}", self.path)
    }
}

impl<T> PartialEq for ObservableResource<T> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}
impl<T> Eq for ObservableResource<T> {}

impl<T> Hash for ObservableResource<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state)
    }
}

impl<T> Borrow<str> for ObservableResource<T> {
    fn borrow(&self) -> &str {
        &self.path
    }
}
