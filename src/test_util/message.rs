use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::message::coap_message::CoapMessage;
use crate::message::message_sender::MessageSender;

/// [MessageSender] that records every message instead of sending it. Messages are checked
///  in the order they were sent.
#[derive(Debug, Default, Clone)]
pub struct TrackingMessageSender {
    tracker: Arc<RwLock<Vec<(SocketAddr, CoapMessage)>>>,
}
impl TrackingMessageSender {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn assert_message_sent(&self, to: SocketAddr, message: CoapMessage) {
        let (actual_to, actual_msg) = self.pop().await;
        assert_eq!(actual_msg, message);
        assert_eq!(actual_to, to);
    }

    /// Remove and return the oldest message that is still tracked
    pub async fn pop(&self) -> (SocketAddr, CoapMessage) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no message was sent");
        }
        lock.remove(0)
    }

    pub async fn sent_messages(&self) -> Vec<(SocketAddr, CoapMessage)> {
        self.tracker.read().await
            .clone()
    }

    pub async fn sent_to(&self, to: SocketAddr) -> Vec<CoapMessage> {
        self.tracker.read().await
            .iter()
            .filter(|(addr, _)| *addr == to)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub async fn num_sent(&self) -> usize {
        self.tracker.read().await
            .len()
    }

    pub async fn clear(&self) {
        self.tracker.write().await
            .clear();
    }

    pub async fn assert_no_remaining_messages(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected messages: {:?}", lock);
    }
}

#[async_trait]
impl MessageSender for TrackingMessageSender {
    async fn send_message(&self, to: SocketAddr, message: &CoapMessage) {
        self.tracker.write().await.push((to, message.clone()));
    }
}
