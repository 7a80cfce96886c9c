use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::message::coap_message::CoapMessage;
use crate::message::message_sender::MessageSender;
use crate::message::token::Token;
use crate::observe::notification_dispatcher::NotificationDispatcher;
use crate::observe::observable_resource::{ObservableResource, ResourceUpdate};
use crate::observe::observer_registry::{Observer, ObserverRegistry};
use crate::observe::resource_handler::ResourceHandler;
use crate::reliability::outbound_reliability::OutboundReliability;
use crate::reliability::reliability_config::ReliabilityConfig;
use crate::reliability::timer::TimerSource;

/// Wires the message exchange engine together for one local endpoint: resources created here
///  report their updates to a notification dispatcher that runs in the background, and inbound
///  ACK / RST messages are matched against the notifications in flight.
///
/// Message encoding and socket I/O are left to the [MessageSender] and to whoever feeds
///  inbound messages to [ObserveEndpoint::on_inbound_message].
pub struct ObserveEndpoint {
    reliability: OutboundReliability,
    observers: Arc<ObserverRegistry>,
    updates: mpsc::UnboundedSender<ResourceUpdate>,
    dispatcher_handle: JoinHandle<()>,
}

impl Debug for ObserveEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObserveEndpoint{{}}")
    }
}

impl ObserveEndpoint {
    /// This must be called from inside a tokio runtime
    pub fn new(config: ReliabilityConfig, message_sender: Arc<dyn MessageSender>, timer: Arc<dyn TimerSource>) -> anyhow::Result<ObserveEndpoint> {
        let reliability = OutboundReliability::new(config, message_sender.clone(), timer)?;
        let observers = Arc::new(ObserverRegistry::default());

        let dispatcher = Arc::new(NotificationDispatcher::new(observers.clone(), reliability.clone(), message_sender));
        let (updates, update_receiver) = mpsc::unbounded_channel();
        let dispatcher_handle = tokio::spawn(dispatcher.run(update_receiver));

        Ok(ObserveEndpoint {
            reliability,
            observers,
            updates,
            dispatcher_handle,
        })
    }

    pub fn reliability(&self) -> &OutboundReliability {
        &self.reliability
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn create_resource<T, H>(&self, path: &str, handler: Arc<H>, initial_status: T, lifetime_seconds: u64) -> ObservableResource<T>
    where T: Clone + Send + Sync + 'static,
          H: ResourceHandler<T>,
    {
        debug!("creating observable resource {}", path);
        ObservableResource::new(path, handler, initial_status, lifetime_seconds, self.updates.clone())
    }

    pub async fn register_observer(&self, path: &str, observer: Observer) {
        self.observers.register(path, observer).await
    }

    pub async fn deregister_observer(&self, path: &str, remote_endpoint: SocketAddr, token: Token) -> Option<Observer> {
        let result = self.observers.deregister(path, remote_endpoint, token).await;
        // a notification that is still being retransmitted is of no interest any more
        self.reliability.abort(remote_endpoint, token).await;
        result
    }

    /// Returns `true` if the message was an ACK or RST for a notification in flight
    pub async fn on_inbound_message(&self, from: SocketAddr, message: &CoapMessage) -> bool {
        trace!("inbound message from {:?}: {:?}", from, message);
        self.reliability.on_inbound_message(from, message).await
    }
}

impl Drop for ObserveEndpoint {
    fn drop(&mut self) {
        self.dispatcher_handle.abort();
    }
}
