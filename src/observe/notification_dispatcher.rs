use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::message::coap_message::{CoapMessage, MessageId};
use crate::message::message_code::MessageCode;
use crate::message::message_sender::MessageSender;
use crate::message::message_type::MessageType;
use crate::observe::observable_resource::{ResourceUpdate, ResourceUpdateKind, StatusChangedData};
use crate::observe::observer_registry::{Observer, ObserverRegistry};
use crate::observe::resource_handler::NotificationPolicy;
use crate::reliability::outbound_reliability::OutboundReliability;
use crate::reliability::outbound_transfer::TransferOutcome;

/// Turns every [ResourceUpdate] into one notification per observer of the resource. Each
///  observer has at most one confirmable notification in flight, delivered by its own reliable
///  transfer, so a failure to reach one observer does not affect any other.
pub struct NotificationDispatcher {
    observers: Arc<ObserverRegistry>,
    reliability: OutboundReliability,
    message_sender: Arc<dyn MessageSender>,
}

impl NotificationDispatcher {
    pub fn new(observers: Arc<ObserverRegistry>, reliability: OutboundReliability, message_sender: Arc<dyn MessageSender>) -> NotificationDispatcher {
        NotificationDispatcher {
            observers,
            reliability,
            message_sender,
        }
    }

    /// Dispatch updates until all of their senders are gone
    pub async fn run(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<ResourceUpdate>) {
        while let Some(update) = updates.recv().await {
            self.dispatch(update).await;
        }
        info!("update channel closed - notification dispatcher terminates");
    }

    pub async fn dispatch(self: &Arc<Self>, update: ResourceUpdate) {
        match &update.kind {
            ResourceUpdateKind::StatusChanged(data) => {
                for observer in self.observers.observers_of(&update.path).await {
                    self.notify(&update.path, update.policy.as_ref(), data, observer).await;
                }
            }
            ResourceUpdateKind::ShuttingDown => {
                self.on_shutdown(&update.path, update.policy.as_ref()).await;
            }
        }
    }

    async fn notify(self: &Arc<Self>, path: &str, policy: &dyn NotificationPolicy, data: &StatusChangedData, observer: Observer) {
        let wrapped = match data.wrapped_status(observer.content_format) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                warn!("cannot notify {:?} of changes to {}: {} - removing observation", observer.remote_endpoint, path, e);
                self.observers.deregister(path, observer.remote_endpoint, observer.token).await;
                self.send_final(policy, &observer, MessageCode::INTERNAL_SERVER_ERROR).await;
                return;
            }
        };

        let mut message = CoapMessage::new(self.message_type(policy, &observer), MessageCode::CONTENT, 0, observer.token);
        message.observe = Some(wrapped.observe_sequence);
        message.content_format = Some(wrapped.content_format);
        message.etag = Some(wrapped.etag);
        message.max_age = Some(wrapped.max_age);
        message.payload = wrapped.content;

        if !message.message_type.is_confirmable() {
            if let Some(message_id) = self.next_message_id(&observer).await {
                message.message_id = message_id;
                self.message_sender.send_message(observer.remote_endpoint, &message).await;
            }
            return;
        }

        // a notification still in flight keeps its message id and retransmission count, and its
        //  next retransmission carries the latest status
        if self.reliability.update_message(observer.remote_endpoint, observer.token, message.clone()).await.is_ok() {
            debug!("notification in flight to {:?} for {} now carries observe sequence {}", observer.remote_endpoint, path, wrapped.observe_sequence);
            return;
        }

        if let Some(message_id) = self.next_message_id(&observer).await {
            message.message_id = message_id;
            self.send_reliably(message, &observer, Some(path)).await;
        }
    }

    async fn on_shutdown(self: &Arc<Self>, path: &str, policy: &dyn NotificationPolicy) {
        let observers = self.observers.deregister_all(path).await;
        info!("resource {} shuts down, notifying {} observer(s)", path, observers.len());

        for observer in observers {
            self.reliability.abort(observer.remote_endpoint, observer.token).await;
            self.send_final(policy, &observer, MessageCode::SERVICE_UNAVAILABLE).await;
        }
    }

    /// An error response without the Observe option, which ends the observation on the client
    async fn send_final(self: &Arc<Self>, policy: &dyn NotificationPolicy, observer: &Observer, code: MessageCode) {
        let Some(message) = self.new_message(policy, observer, code).await else {
            return;
        };

        if message.message_type.is_confirmable() {
            self.reliability.abort(observer.remote_endpoint, observer.token).await;
            self.send_reliably(message, observer, None).await;
        }
        else {
            self.message_sender.send_message(observer.remote_endpoint, &message).await;
        }
    }

    async fn new_message(&self, policy: &dyn NotificationPolicy, observer: &Observer, code: MessageCode) -> Option<CoapMessage> {
        let message_id = self.next_message_id(observer).await?;
        Some(CoapMessage::new(self.message_type(policy, observer), code, message_id, observer.token))
    }

    fn message_type(&self, policy: &dyn NotificationPolicy, observer: &Observer) -> MessageType {
        let message_type = observer.message_type
            .unwrap_or_else(|| policy.message_type_for_notification(observer.remote_endpoint));
        match message_type {
            MessageType::Confirmable | MessageType::NonConfirmable => message_type,
            other => {
                warn!("notifications can not be sent as {:?} - sending as confirmable", other);
                MessageType::Confirmable
            }
        }
    }

    async fn next_message_id(&self, observer: &Observer) -> Option<MessageId> {
        match self.reliability.next_message_id(observer.remote_endpoint).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                error!("no message id for notification to {:?}: {}", observer.remote_endpoint, e);
                None
            }
        }
    }

    /// Start a reliable transfer. If `observed_path` is given, the observation is removed if the
    ///  transfer fails or the observer rejects the notification.
    async fn send_reliably(self: &Arc<Self>, message: CoapMessage, observer: &Observer, observed_path: Option<&str>) {
        let completion = match self.reliability.start(observer.remote_endpoint, message).await {
            Ok(completion) => completion,
            Err(e) => {
                error!("could not send notification to {:?}: {}", observer.remote_endpoint, e);
                return;
            }
        };

        let Some(path) = observed_path else {
            return;
        };

        let dispatcher = self.clone();
        let path = path.to_string();
        let remote_endpoint = observer.remote_endpoint;
        let token = observer.token;
        tokio::spawn(async move {
            match completion.await {
                Ok(TransferOutcome::Exhausted) => {
                    info!("{:?} did not acknowledge notification for {} - removing observation", remote_endpoint, path);
                    dispatcher.observers.deregister(&path, remote_endpoint, token).await;
                }
                Ok(TransferOutcome::Reset) => {
                    info!("{:?} rejected notification for {} - removing observation", remote_endpoint, path);
                    dispatcher.observers.deregister(&path, remote_endpoint, token).await;
                }
                Ok(_) => {}
                Err(_) => debug!("transfer to {:?} was dropped without outcome", remote_endpoint),
            }
        });
    }
}
