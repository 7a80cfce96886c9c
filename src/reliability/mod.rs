//! Reliable delivery of confirmable messages: each outbound confirmable message gets an
//!  [outbound_transfer::OutboundReliableTransfer] that retransmits it with randomized exponential
//!  backoff until it is acknowledged, reset, aborted, or runs out of retransmissions.

pub mod message_id_factory;
pub mod outbound_reliability;
pub mod outbound_transfer;
pub mod reliability_config;
pub mod timer;
pub mod transfer_registry;
