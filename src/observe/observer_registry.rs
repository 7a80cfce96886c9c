use std::net::SocketAddr;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::message::content_format::ContentFormat;
use crate::message::message_type::MessageType;
use crate::message::token::Token;

/// A remote endpoint's subscription to a resource, identified by the endpoint and the token of
///  its observe request
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Observer {
    pub remote_endpoint: SocketAddr,
    pub token: Token,
    pub content_format: ContentFormat,
    /// overrides the resource's notification policy if present
    pub message_type: Option<MessageType>,
}

impl Observer {
    pub fn new(remote_endpoint: SocketAddr, token: Token, content_format: ContentFormat) -> Observer {
        Observer {
            remote_endpoint,
            token,
            content_format,
            message_type: None,
        }
    }

    pub fn with_message_type(self, message_type: MessageType) -> Observer {
        Observer {
            message_type: Some(message_type),
            ..self
        }
    }

    fn is(&self, remote_endpoint: SocketAddr, token: Token) -> bool {
        self.remote_endpoint == remote_endpoint && self.token == token
    }
}

/// Observers per resource path, in registration order
#[derive(Default)]
pub struct ObserverRegistry {
    by_path: RwLock<FxHashMap<String, Vec<Observer>>>,
}

impl ObserverRegistry {
    /// Registering an observer with the same endpoint and token as an existing one for the same
    ///  path replaces it
    pub async fn register(&self, path: &str, observer: Observer) {
        let mut by_path = self.by_path.write().await;
        let observers = by_path.entry(path.to_string()).or_default();

        match observers.iter_mut().find(|o| o.is(observer.remote_endpoint, observer.token)) {
            Some(existing) => {
                debug!("replacing observer {:?} of {}", existing, path);
                *existing = observer;
            }
            None => {
                debug!("registering observer {:?} of {}", observer, path);
                observers.push(observer);
            }
        }
    }

    pub async fn deregister(&self, path: &str, remote_endpoint: SocketAddr, token: Token) -> Option<Observer> {
        let mut by_path = self.by_path.write().await;
        let observers = by_path.get_mut(path)?;

        let idx = observers.iter().position(|o| o.is(remote_endpoint, token))?;
        let removed = observers.remove(idx);
        if observers.is_empty() {
            by_path.remove(path);
        }

        debug!("deregistered observer {:?} of {}", removed, path);
        Some(removed)
    }

    pub async fn deregister_all(&self, path: &str) -> Vec<Observer> {
        self.by_path.write().await
            .remove(path)
            .unwrap_or_default()
    }

    pub async fn observers_of(&self, path: &str) -> Vec<Observer> {
        self.by_path.read().await
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_observing(&self, path: &str, remote_endpoint: SocketAddr, token: Token) -> bool {
        self.by_path.read().await
            .get(path)
            .map(|observers| observers.iter().any(|o| o.is(remote_endpoint, token)))
            .unwrap_or(false)
    }
}
