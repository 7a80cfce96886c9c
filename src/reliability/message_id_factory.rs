use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::message::coap_message::MessageId;
use crate::reliability::transfer_registry::{ExchangeId, TransferRegistry};
use crate::util::random::Random;

/// Allocates message ids per remote endpoint. Each endpoint's sequence starts at a random
///  value and wraps around; ids that are still in flight are skipped.
///
/// An endpoint's sequence is forgotten once no id was allocated for it for `id_lifetime`, so
///  the number of sequences is bounded by the number of endpoints messaged within that time.
pub struct MessageIdFactory {
    id_lifetime: Duration,
    state: Mutex<FactoryState>,
}

struct FactoryState {
    sequences: FxHashMap<SocketAddr, Sequence>,
    last_purge: Instant,
}

struct Sequence {
    next: MessageId,
    last_used: Instant,
}

impl MessageIdFactory {
    pub fn new(id_lifetime: Duration) -> MessageIdFactory {
        MessageIdFactory {
            id_lifetime,
            state: Mutex::new(FactoryState {
                sequences: Default::default(),
                last_purge: Instant::now(),
            }),
        }
    }

    pub async fn next_message_id<R: Random>(&self, remote_endpoint: SocketAddr, registry: &TransferRegistry) -> anyhow::Result<MessageId> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if now.duration_since(state.last_purge) >= self.id_lifetime {
            let id_lifetime = self.id_lifetime;
            let before = state.sequences.len();
            state.sequences.retain(|_, sequence| now.duration_since(sequence.last_used) < id_lifetime);
            state.last_purge = now;
            debug!("forgot message id sequences of {} idle endpoint(s)", before - state.sequences.len());
        }

        let sequence = state.sequences.entry(remote_endpoint)
            .or_insert_with(|| Sequence { next: R::next_u16(), last_used: now });
        sequence.last_used = now;

        for _ in 0..=MessageId::MAX as u32 {
            let candidate = sequence.next;
            sequence.next = candidate.wrapping_add(1);

            if !registry.contains(&ExchangeId::new(remote_endpoint, candidate)).await {
                return Ok(candidate);
            }
            debug!("message id {} is in flight to {:?} - skipping", candidate, remote_endpoint);
        }

        bail!("all message ids are in flight to {:?}", remote_endpoint)
    }

    #[cfg(test)]
    async fn num_sequences(&self) -> usize {
        self.state.lock().await.sequences.len()
    }
}
