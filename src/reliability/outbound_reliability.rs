use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::message::coap_message::{CoapMessage, MessageId};
use crate::message::message_sender::MessageSender;
use crate::message::message_type::MessageType;
use crate::message::token::Token;
use crate::reliability::message_id_factory::MessageIdFactory;
use crate::reliability::outbound_transfer::{OutboundReliableTransfer, TimerFireOutcome, TransferCompletion};
use crate::reliability::reliability_config::ReliabilityConfig;
use crate::reliability::timer::{TimerSource, TimerTask};
use crate::reliability::transfer_registry::{ExchangeId, SharedTransfer, TransferRegistry};
use crate::util::random::{Random, RngRandom};

/// Retransmits outbound confirmable messages until they are acknowledged, reset or aborted, or
///  until the configured number of retransmissions is used up. The initiator of a transfer is
///  told how it ended through the [TransferCompletion] returned by [OutboundReliability::start].
///
/// All state changes of a given transfer are serialized, so a transfer ends exactly once, and
///  a confirmed, reset or aborted message is never resent.
#[derive(Clone)]
pub struct OutboundReliability {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ReliabilityConfig>,
    message_sender: Arc<dyn MessageSender>,
    timer: Arc<dyn TimerSource>,
    registry: TransferRegistry,
    message_ids: MessageIdFactory,
}

impl OutboundReliability {
    pub fn new(config: ReliabilityConfig, message_sender: Arc<dyn MessageSender>, timer: Arc<dyn TimerSource>) -> anyhow::Result<OutboundReliability> {
        config.validate()?;
        let message_ids = MessageIdFactory::new(config.exchange_lifetime());

        Ok(OutboundReliability {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                message_sender,
                timer,
                registry: Default::default(),
                message_ids,
            }),
        })
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.inner.registry
    }

    /// A message id for a new message to the given endpoint, guaranteed not to be in flight
    pub async fn next_message_id(&self, remote_endpoint: SocketAddr) -> anyhow::Result<MessageId> {
        self.inner.message_ids.next_message_id::<RngRandom>(remote_endpoint, &self.inner.registry).await
    }

    /// Send a confirmable message, and keep retransmitting it until the transfer ends.
    ///
    /// Fails without sending if the message is not confirmable, or if there is a transfer with
    ///  the same message id to the same endpoint in flight.
    pub async fn start(&self, remote_endpoint: SocketAddr, message: CoapMessage) -> anyhow::Result<TransferCompletion> {
        if message.message_type != MessageType::Confirmable {
            bail!("only confirmable messages are sent reliably, message was {:?}", message.message_type);
        }

        let id = ExchangeId::new(remote_endpoint, message.message_id);
        let token = message.token;
        let (transfer, completion) = OutboundReliableTransfer::new(self.inner.config.clone(), remote_endpoint, message);
        let shared: SharedTransfer = Arc::new(Mutex::new(transfer));

        // hold the transfer's lock until the retransmission is scheduled: an ACK arriving
        //  right after the initial send must see the handle
        let mut transfer = shared.lock().await;
        self.inner.registry.insert(shared.clone(), id, token).await?;

        debug!("starting reliable transfer of message id {} to {:?}", id.message_id, remote_endpoint);
        self.inner.message_sender.send_message(remote_endpoint, transfer.message()).await;
        self.inner.schedule_retransmission::<RngRandom>(id, &mut *transfer);

        Ok(completion)
    }

    /// Match an inbound message against the transfers in flight. Returns `true` if it is an ACK
    ///  or RST that ended a transfer.
    pub async fn on_inbound_message(&self, from: SocketAddr, message: &CoapMessage) -> bool {
        if !message.message_type.is_response_to_confirmable() {
            return false;
        }

        let id = ExchangeId::new(from, message.message_id);
        if message.message_type == MessageType::Reset {
            self.reset(&id).await
        }
        else {
            self.confirm(&id).await
        }
    }

    /// Returns `true` if this call ended the transfer
    pub async fn confirm(&self, id: &ExchangeId) -> bool {
        let Some(shared) = self.inner.registry.get(id).await else {
            debug!("ACK for {:?} does not match a transfer in flight - ignoring", id);
            return false;
        };
        self.inner.finish(id, &shared, |t| t.confirm()).await
    }

    /// Returns `true` if this call ended the transfer
    pub async fn reset(&self, id: &ExchangeId) -> bool {
        let Some(shared) = self.inner.registry.get(id).await else {
            debug!("RST for {:?} does not match a transfer in flight - ignoring", id);
            return false;
        };
        info!("{:?} was rejected with RST", id);
        self.inner.finish(id, &shared, |t| t.confirm_by_reset()).await
    }

    /// Abort the transfer in flight with the given token, if any. Returns `true` if a transfer
    ///  was aborted.
    pub async fn abort(&self, remote_endpoint: SocketAddr, token: Token) -> bool {
        let Some((id, shared)) = self.inner.registry.get_by_token(remote_endpoint, token).await else {
            trace!("no transfer with token {:?} to {:?} to abort", token, remote_endpoint);
            return false;
        };
        self.inner.finish(&id, &shared, |t| t.abort()).await
    }

    /// Change what the next retransmission of the transfer in flight with the given token sends.
    ///  The message id stays the same.
    pub async fn update_message(&self, remote_endpoint: SocketAddr, token: Token, message: CoapMessage) -> anyhow::Result<()> {
        let (_, shared) = self.inner.registry.get_by_token(remote_endpoint, token).await
            .ok_or_else(|| anyhow!("no transfer with token {:?} in flight to {:?}", token, remote_endpoint))?;

        let mut transfer = shared.lock().await;
        transfer.update_message(message)
    }
}

impl Inner {
    fn schedule_retransmission<R: Random>(self: &Arc<Self>, id: ExchangeId, transfer: &mut OutboundReliableTransfer) {
        let delay = transfer.next_retransmission_delay::<R>();
        trace!("scheduling retransmission of {:?} in {:?}", id, delay);

        let handle = self.timer.schedule(delay, self.clone().retransmission_task(id));
        transfer.set_retransmission_handle(handle);
    }

    fn retransmission_task(self: Arc<Self>, id: ExchangeId) -> TimerTask {
        Box::pin(async move {
            self.on_timer_fire(id).await;
        })
    }

    async fn on_timer_fire(self: &Arc<Self>, id: ExchangeId) {
        let Some(shared) = self.registry.get(&id).await else {
            debug!("retransmission timer fired for {:?}, which is no longer in flight", id);
            return;
        };

        let mut transfer = shared.lock().await;
        match transfer.on_timer_fire() {
            TimerFireOutcome::Retransmit { message, retransmission } => {
                trace!("retransmission #{} of {:?}", retransmission, id);
                self.message_sender.send_message(id.remote_endpoint, &message).await;
                self.schedule_retransmission::<RngRandom>(id, &mut *transfer);
            }
            TimerFireOutcome::Exhausted => {
                warn!("delivery of {:?} failed: no acknowledgement after {} retransmissions", id, self.config.max_retransmissions);
                self.registry.remove(&id, transfer.token()).await;
            }
            TimerFireOutcome::Ignored => {}
        }
    }

    async fn finish(&self, id: &ExchangeId, shared: &SharedTransfer, f: impl FnOnce(&mut OutboundReliableTransfer) -> bool) -> bool {
        let mut transfer = shared.lock().await;
        if !f(&mut *transfer) {
            return false;
        }
        self.registry.remove(id, transfer.token()).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use bytes::Bytes;
    use rstest::rstest;
    use tokio::time;
    use super::*;
    use crate::message::content_format::ContentFormat;
    use crate::message::message_code::MessageCode;
    use crate::reliability::outbound_transfer::TransferOutcome;
    use crate::reliability::timer::TokioTimerSource;
    use crate::test_util::message::TrackingMessageSender;
    use crate::test_util::timer::ManualTimerSource;

    fn remote() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], 5683))
    }

    fn con(message_id: MessageId, token: Token, payload: &'static [u8]) -> CoapMessage {
        CoapMessage::new(MessageType::Confirmable, MessageCode::CONTENT, message_id, token)
            .with_payload(ContentFormat::TEXT_PLAIN_UTF8, Bytes::from_static(payload))
    }

    fn tokio_reliability(sender: &TrackingMessageSender) -> OutboundReliability {
        OutboundReliability::new(ReliabilityConfig::new(), Arc::new(sender.clone()), Arc::new(TokioTimerSource::default())).unwrap()
    }

    fn manual_reliability(sender: &TrackingMessageSender, timer: &ManualTimerSource) -> OutboundReliability {
        OutboundReliability::new(ReliabilityConfig::new(), Arc::new(sender.clone()), Arc::new(timer.clone())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_transfer_is_exhausted() {
        let sender = TrackingMessageSender::new();
        let reliability = tokio_reliability(&sender);

        let mut completion = reliability.start(remote(), con(7, Token::EMPTY, b"x")).await.unwrap();

        time::sleep(Duration::from_secs(100)).await;

        let sent = sender.sent_messages().await;
        assert_eq!(sent.len(), 5);
        for (to, msg) in sent {
            assert_eq!(to, remote());
            assert_eq!(msg, con(7, Token::EMPTY, b"x"));
        }
        assert_eq!(completion.try_recv().unwrap(), TransferOutcome::Exhausted);
        assert!(!reliability.registry().contains(&ExchangeId::new(remote(), 7)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmission_timing() {
        let sender = TrackingMessageSender::new();
        let reliability = tokio_reliability(&sender);

        let _completion = reliability.start(remote(), con(7, Token::EMPTY, b"x")).await.unwrap();
        assert_eq!(sender.num_sent().await, 1);

        // first retransmission between 2 and 3 seconds after the initial send
        time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(sender.num_sent().await, 1);
        time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(sender.num_sent().await, 2);

        // all retransmissions are sent within MAX_TRANSMIT_SPAN
        time::sleep(reliability.config().max_transmit_span() - Duration::from_millis(3000)).await;
        assert_eq!(sender.num_sent().await, 5);
    }

    #[tokio::test]
    async fn test_delays_double() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let mut completion = reliability.start(remote(), con(1, Token::EMPTY, b"x")).await.unwrap();
        for _ in 0..5 {
            timer.fire_next().await.unwrap();
        }
        assert_eq!(completion.try_recv().unwrap(), TransferOutcome::Exhausted);
        assert!(timer.pending().is_empty());

        let delays = timer.all_delays();
        assert_eq!(delays.len(), 5);
        for (n, delay) in delays.iter().enumerate() {
            let base = Duration::from_millis(2000 * (1 << n));
            assert!(*delay >= base, "{:?}", delay);
            assert!(*delay < base * 3 / 2, "{:?}", delay);
        }
    }

    #[rstest]
    #[case::before_first_retransmission(0)]
    #[case::after_first_retransmission(1)]
    #[case::after_last_retransmission(4)]
    #[tokio::test]
    async fn test_ack_stops_retransmission(#[case] num_retransmissions: usize) {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let mut completion = reliability.start(remote(), con(3, Token::from_u64(1), b"x")).await.unwrap();
        for _ in 0..num_retransmissions {
            timer.fire_next().await.unwrap();
        }
        assert_eq!(sender.num_sent().await, num_retransmissions + 1);

        assert!(reliability.on_inbound_message(remote(), &CoapMessage::empty_ack(3)).await);

        assert_eq!(completion.try_recv().unwrap(), TransferOutcome::Confirmed);
        assert!(timer.pending().is_empty());
        assert_eq!(timer.num_cancelled(), 1);
        assert!(reliability.registry().is_empty().await);

        // a duplicate ACK matches nothing
        assert!(!reliability.on_inbound_message(remote(), &CoapMessage::empty_ack(3)).await);
        assert_eq!(sender.num_sent().await, num_retransmissions + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resend_after_ack() {
        let sender = TrackingMessageSender::new();
        let reliability = tokio_reliability(&sender);

        let _completion = reliability.start(remote(), con(3, Token::EMPTY, b"x")).await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        reliability.on_inbound_message(remote(), &CoapMessage::empty_ack(3)).await;

        time::sleep(Duration::from_secs(100)).await;
        assert_eq!(sender.num_sent().await, 1);
    }

    #[tokio::test]
    async fn test_ack_racing_with_timer() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let mut completion = reliability.start(remote(), con(3, Token::EMPTY, b"x")).await.unwrap();

        // the timer fires, and the ACK is processed before the retransmission callback runs
        let (_, task) = timer.take_next().unwrap();
        assert!(reliability.confirm(&ExchangeId::new(remote(), 3)).await);
        task.await;

        assert_eq!(sender.num_sent().await, 1);
        assert!(timer.pending().is_empty());
        // the timer had fired already, so there was nothing left to cancel
        assert_eq!(timer.num_cancelled(), 0);
        assert_eq!(completion.try_recv().unwrap(), TransferOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_ack_from_other_endpoint_is_ignored() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let _completion = reliability.start(remote(), con(3, Token::EMPTY, b"x")).await.unwrap();

        let other = SocketAddr::from(([192, 168, 1, 21], 5683));
        assert!(!reliability.on_inbound_message(other, &CoapMessage::empty_ack(3)).await);
        assert!(!reliability.on_inbound_message(remote(), &CoapMessage::empty_ack(4)).await);
        assert!(!reliability.on_inbound_message(remote(), &con(3, Token::EMPTY, b"")).await);
        assert_eq!(timer.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_reset() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let mut completion = reliability.start(remote(), con(3, Token::EMPTY, b"x")).await.unwrap();
        assert!(reliability.on_inbound_message(remote(), &CoapMessage::reset(3)).await);

        assert_eq!(completion.try_recv().unwrap(), TransferOutcome::Reset);
        assert!(timer.pending().is_empty());
        assert!(reliability.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_abort() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);
        let token = Token::from_u64(0x77);

        let mut completion = reliability.start(remote(), con(3, token, b"x")).await.unwrap();

        assert!(reliability.abort(remote(), token).await);
        assert!(!reliability.abort(remote(), token).await);

        assert_eq!(completion.try_recv().unwrap(), TransferOutcome::Aborted);
        assert!(timer.pending().is_empty());
        assert!(!reliability.registry().contains_token(remote(), token).await);
        assert!(!reliability.on_inbound_message(remote(), &CoapMessage::empty_ack(3)).await);
    }

    #[tokio::test]
    async fn test_update_message() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);
        let token = Token::from_u64(0x77);

        let _completion = reliability.start(remote(), con(3, token, b"old")).await.unwrap();
        reliability.update_message(remote(), token, con(999, token, b"new")).await.unwrap();
        timer.fire_next().await.unwrap();

        sender.assert_message_sent(remote(), con(3, token, b"old")).await;
        sender.assert_message_sent(remote(), con(3, token, b"new")).await;
        sender.assert_no_remaining_messages().await;

        assert!(reliability.update_message(remote(), Token::from_u64(1), con(4, Token::from_u64(1), b"")).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_rejected() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let _completion = reliability.start(remote(), con(3, Token::EMPTY, b"x")).await.unwrap();
        assert!(reliability.start(remote(), con(3, Token::from_u64(2), b"y")).await.is_err());

        assert_eq!(sender.num_sent().await, 1);
        assert_eq!(timer.pending().len(), 1);
    }

    #[rstest]
    #[case::non(MessageType::NonConfirmable)]
    #[case::ack(MessageType::Acknowledgement)]
    #[case::rst(MessageType::Reset)]
    #[tokio::test]
    async fn test_only_confirmable_messages(#[case] message_type: MessageType) {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let mut message = con(3, Token::EMPTY, b"x");
        message.message_type = message_type;
        assert!(reliability.start(remote(), message).await.is_err());

        sender.assert_no_remaining_messages().await;
        assert!(reliability.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let config = ReliabilityConfig { ack_random_factor: 0.5, ..ReliabilityConfig::new() };
        assert!(OutboundReliability::new(config, Arc::new(TrackingMessageSender::new()), Arc::new(ManualTimerSource::new())).is_err());
    }

    #[tokio::test]
    async fn test_next_message_id_skips_ids_in_flight() {
        let sender = TrackingMessageSender::new();
        let timer = ManualTimerSource::new();
        let reliability = manual_reliability(&sender, &timer);

        let first = reliability.next_message_id(remote()).await.unwrap();
        let second_in_flight = first.wrapping_add(1);
        let _completion = reliability.start(remote(), con(second_in_flight, Token::EMPTY, b"x")).await.unwrap();

        assert_eq!(reliability.next_message_id(remote()).await.unwrap(), first.wrapping_add(2));
    }
}
