use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

use crate::message::coap_message::MessageId;
use crate::message::token::Token;
use crate::reliability::outbound_transfer::OutboundReliableTransfer;

/// Identifies a message exchange: message ids are only unique per remote endpoint
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ExchangeId {
    pub remote_endpoint: SocketAddr,
    pub message_id: MessageId,
}

impl ExchangeId {
    pub fn new(remote_endpoint: SocketAddr, message_id: MessageId) -> ExchangeId {
        ExchangeId {
            remote_endpoint,
            message_id,
        }
    }
}

pub(crate) type SharedTransfer = Arc<Mutex<OutboundReliableTransfer>>;

/// All outbound confirmable transfers that are still in flight, indexed by (remote endpoint,
///  message id) and by (remote endpoint, token).
///
/// Every transfer in the registry is active; it is removed by whoever moves it to a terminal
///  state.
#[derive(Default)]
pub struct TransferRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_message_id: FxHashMap<ExchangeId, SharedTransfer>,
    by_token: FxHashMap<(SocketAddr, Token), MessageId>,
}

impl TransferRegistry {
    pub(crate) async fn insert(&self, transfer: SharedTransfer, id: ExchangeId, token: Token) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;

        if inner.by_message_id.contains_key(&id) {
            bail!("message id {} is already in flight to {:?}", id.message_id, id.remote_endpoint);
        }

        trace!("registering transfer {:?} with token {:?}", id, token);
        inner.by_message_id.insert(id, transfer);
        // a newer transfer with the same token takes over the token
        inner.by_token.insert((id.remote_endpoint, token), id.message_id);
        Ok(())
    }

    pub(crate) async fn get(&self, id: &ExchangeId) -> Option<SharedTransfer> {
        self.inner.read().await
            .by_message_id.get(id)
            .cloned()
    }

    pub(crate) async fn get_by_token(&self, remote_endpoint: SocketAddr, token: Token) -> Option<(ExchangeId, SharedTransfer)> {
        let inner = self.inner.read().await;

        let message_id = *inner.by_token.get(&(remote_endpoint, token))?;
        let id = ExchangeId::new(remote_endpoint, message_id);
        inner.by_message_id.get(&id)
            .map(|transfer| (id, transfer.clone()))
    }

    pub(crate) async fn remove(&self, id: &ExchangeId, token: Token) -> Option<SharedTransfer> {
        let mut inner = self.inner.write().await;

        let removed = inner.by_message_id.remove(id);
        if removed.is_some() {
            let token_key = (id.remote_endpoint, token);
            if inner.by_token.get(&token_key) == Some(&id.message_id) {
                inner.by_token.remove(&token_key);
            }
            trace!("removed transfer {:?}", id);
        }
        removed
    }

    pub async fn contains(&self, id: &ExchangeId) -> bool {
        self.inner.read().await
            .by_message_id.contains_key(id)
    }

    pub async fn contains_token(&self, remote_endpoint: SocketAddr, token: Token) -> bool {
        self.inner.read().await
            .by_token.contains_key(&(remote_endpoint, token))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await
            .by_message_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
