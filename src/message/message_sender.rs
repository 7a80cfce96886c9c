use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::message::coap_message::CoapMessage;

/// This is the seam to the encoding and socket layer, introduced to keep I/O out of the
///  protocol logic and to facilitate mocking it away for testing.
///
/// NB: Sending does not return Result - the engine never retries on a local send error but
///      relies on its regular retransmission logic, so implementations are expected to log
///      failures and return
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    async fn send_message(&self, to: SocketAddr, message: &CoapMessage);
}
