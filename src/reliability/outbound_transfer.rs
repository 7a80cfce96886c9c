use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::message::coap_message::{CoapMessage, MessageId};
use crate::message::token::Token;
use crate::reliability::reliability_config::ReliabilityConfig;
use crate::reliability::timer::TimerHandle;
use crate::util::random::Random;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferState {
    Active { retransmissions: u32 },
    /// terminal: the peer answered with ACK or RST
    Confirmed,
    /// terminal: all retransmissions were sent without an answer
    Exhausted,
    /// terminal: cancelled for reasons unrelated to acknowledgement
    Aborted,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferState::Active { .. })
    }
}

/// How a transfer ended, reported to whoever started it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferOutcome {
    Confirmed,
    /// the peer rejected the message with RST
    Reset,
    /// delivery failure: no answer after all retransmissions
    Exhausted,
    Aborted,
}

/// Resolves exactly once, with the terminal outcome of a transfer. If the receiver is dropped,
///  the outcome is discarded.
pub type TransferCompletion = oneshot::Receiver<TransferOutcome>;

#[derive(Debug, Eq, PartialEq)]
pub enum TimerFireOutcome {
    /// resend `message` - this is retransmission number `retransmission`
    Retransmit { message: CoapMessage, retransmission: u32 },
    /// the transfer just gave up
    Exhausted,
    /// the transfer had already reached a terminal state
    Ignored,
}


/// The retransmission state of a single outbound confirmable message.
///
/// This is plain state: scheduling, sending and registry bookkeeping are done by the caller
///  ([crate::reliability::outbound_reliability::OutboundReliability]), which serializes all
///  calls for a given transfer.
pub struct OutboundReliableTransfer {
    config: Arc<ReliabilityConfig>,
    remote_endpoint: SocketAddr,
    message: CoapMessage,
    state: TransferState,
    pending_retransmission: Option<Box<dyn TimerHandle>>,
    completion: Option<oneshot::Sender<TransferOutcome>>,
}

impl Debug for OutboundReliableTransfer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutboundReliableTransfer{{remote_endpoint:{:?}, message_id:{}, state:{:?}}}", self.remote_endpoint, self.message.message_id, self.state)
    }
}

impl OutboundReliableTransfer {
    pub fn new(config: Arc<ReliabilityConfig>, remote_endpoint: SocketAddr, message: CoapMessage) -> (OutboundReliableTransfer, TransferCompletion) {
        let (completion, completion_receiver) = oneshot::channel();

        let transfer = OutboundReliableTransfer {
            config,
            remote_endpoint,
            message,
            state: TransferState::Active { retransmissions: 0 },
            pending_retransmission: None,
            completion: Some(completion),
        };
        (transfer, completion_receiver)
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    pub fn message_id(&self) -> MessageId {
        self.message.message_id
    }

    pub fn token(&self) -> Token {
        self.message.token
    }

    pub fn message(&self) -> &CoapMessage {
        &self.message
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn retransmissions(&self) -> u32 {
        match self.state {
            TransferState::Active { retransmissions } => retransmissions,
            _ => self.config.max_retransmissions,
        }
    }

    /// The delay before the next retransmission, freshly randomized
    pub fn next_retransmission_delay<R: Random>(&self) -> Duration {
        self.config.retransmission_delay::<R>(self.retransmissions() + 1)
    }

    /// Store the handle of the scheduled next retransmission. If the transfer is no longer active,
    ///  the retransmission is cancelled right away.
    pub fn set_retransmission_handle(&mut self, handle: Box<dyn TimerHandle>) {
        if self.state.is_terminal() {
            debug!("transfer to {:?} with message id {} is already {:?} - cancelling retransmission", self.remote_endpoint, self.message.message_id, self.state);
            handle.cancel();
            return;
        }

        if let Some(previous) = self.pending_retransmission.replace(handle) {
            previous.cancel();
        }
    }

    pub fn on_timer_fire(&mut self) -> TimerFireOutcome {
        match self.state {
            TransferState::Active { retransmissions } if retransmissions >= self.config.max_retransmissions => {
                info!("no acknowledgement from {:?} for message id {} after {} retransmissions - giving up", self.remote_endpoint, self.message.message_id, retransmissions);
                self.pending_retransmission = None;
                self.finish(TransferState::Exhausted, TransferOutcome::Exhausted);
                TimerFireOutcome::Exhausted
            }
            TransferState::Active { retransmissions } => {
                let retransmission = retransmissions + 1;
                self.state = TransferState::Active { retransmissions: retransmission };
                // the handle belongs to the timer that just fired
                self.pending_retransmission = None;

                debug!("retransmission #{} of message id {} to {:?}", retransmission, self.message.message_id, self.remote_endpoint);
                TimerFireOutcome::Retransmit {
                    message: self.message.clone(),
                    retransmission,
                }
            }
            state => {
                debug!("retransmission timer for message id {} to {:?} fired in state {:?} - ignoring", self.message.message_id, self.remote_endpoint, state);
                TimerFireOutcome::Ignored
            }
        }
    }

    /// Replace the message to be sent with the next retransmission. The replacement keeps this
    ///  transfer's message id; a retransmission that is already in flight is not affected.
    pub fn update_message(&mut self, mut message: CoapMessage) -> anyhow::Result<()> {
        if self.state.is_terminal() {
            bail!("cannot update message id {} to {:?}: transfer is {:?}", self.message.message_id, self.remote_endpoint, self.state);
        }

        message.message_id = self.message.message_id;
        info!("updated message for retransmission #{} to {:?}: {:?}", self.retransmissions() + 1, self.remote_endpoint, message);
        self.message = message;
        Ok(())
    }

    /// Stop retransmitting because the peer acknowledged the message. Returns `true` if this call
    ///  ended the transfer, `false` if it had ended before.
    pub fn confirm(&mut self) -> bool {
        self.confirm_with(TransferOutcome::Confirmed)
    }

    /// Like [Self::confirm], for a peer that answered with RST
    pub fn confirm_by_reset(&mut self) -> bool {
        self.confirm_with(TransferOutcome::Reset)
    }

    /// Stop retransmitting for reasons unrelated to acknowledgement. Returns `true` if this call
    ///  ended the transfer.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            debug!("aborting transfer of message id {} to {:?}: already {:?}", self.message.message_id, self.remote_endpoint, self.state);
            return false;
        }

        self.cancel_pending_retransmission();
        self.finish(TransferState::Aborted, TransferOutcome::Aborted);
        true
    }

    fn confirm_with(&mut self, outcome: TransferOutcome) -> bool {
        if self.state.is_terminal() {
            debug!("confirming message id {} to {:?}: already {:?}", self.message.message_id, self.remote_endpoint, self.state);
            return false;
        }

        self.cancel_pending_retransmission();
        self.finish(TransferState::Confirmed, outcome);
        true
    }

    fn cancel_pending_retransmission(&mut self) {
        if let Some(handle) = self.pending_retransmission.take() {
            if handle.cancel() {
                debug!("retransmission stopped (remote endpoint: {:?}, message id: {})", self.remote_endpoint, self.message.message_id);
            }
            else {
                // the timer fired concurrently - the retransmission will find the transfer terminal
                warn!("could not stop retransmission, timer already fired (remote endpoint: {:?}, message id: {})", self.remote_endpoint, self.message.message_id);
            }
        }
    }

    fn finish(&mut self, state: TransferState, outcome: TransferOutcome) {
        self.state = state;
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(outcome);
        }
    }
}
