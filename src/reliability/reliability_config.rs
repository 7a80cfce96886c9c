use std::time::Duration;

use anyhow::bail;

use crate::util::random::Random;

pub const MAX_RETRANSMISSIONS: u32 = 4;

/// minimum number of milliseconds to wait before the first retransmission of a confirmable message
pub const ACK_TIMEOUT_MILLIS: u64 = 2000;

/// upper bound (exclusive) of the jitter factor applied to the ack timeout, i.e. the first
///  retransmission happens between 2000 and 3000 millis after the initial send
pub const ACK_RANDOM_FACTOR: f64 = 1.5;

/// assumed upper bound for the time a datagram takes from sender to receiver
pub const MAX_LATENCY: Duration = Duration::from_secs(100);

#[derive(Clone, Debug)]
pub struct ReliabilityConfig {
    pub max_retransmissions: u32,
    pub ack_timeout: Duration,
    /// >= 1.0
    pub ack_random_factor: f64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliabilityConfig {
    pub fn new() -> ReliabilityConfig {
        ReliabilityConfig {
            max_retransmissions: MAX_RETRANSMISSIONS,
            ack_timeout: Duration::from_millis(ACK_TIMEOUT_MILLIS),
            ack_random_factor: ACK_RANDOM_FACTOR,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ack_timeout.is_zero() {
            bail!("ack timeout must be positive");
        }
        if !(self.ack_random_factor >= 1.0) {
            bail!("ack random factor must be at least 1.0, was {}", self.ack_random_factor);
        }
        if self.max_retransmissions > 16 {
            bail!("there can be at most 16 retransmissions, was {}", self.max_retransmissions);
        }
        Ok(())
    }

    /// The randomized delay before the given retransmission (1-based, i.e. 1 is the delay between
    ///  the initial send and the first retransmission):
    ///
    /// ```ascii
    /// 2^(n-1) * ack_timeout * (1 + U * (ack_random_factor - 1)),   U uniform in [0, 1)
    /// ```
    ///
    /// Every call draws a fresh `U`.
    pub fn retransmission_delay<R: Random>(&self, retransmission: u32) -> Duration {
        debug_assert!(retransmission >= 1);
        let exponent = retransmission.max(1) - 1;

        let jitter = 1.0 + R::unit_interval() * (self.ack_random_factor - 1.0);
        let millis = (1u64 << exponent) as f64 * self.ack_timeout.as_millis() as f64 * jitter;
        Duration::from_millis(millis as u64)
    }

    /// Upper bound for the time from the initial send to the last retransmission
    pub fn max_transmit_span(&self) -> Duration {
        let millis = ((1u64 << self.max_retransmissions) - 1) as f64
            * self.ack_timeout.as_millis() as f64
            * self.ack_random_factor;
        Duration::from_millis(millis as u64)
    }

    /// Upper bound for the time from the initial send until a transfer without acknowledgement
    ///  is given up, i.e. [Self::max_transmit_span] plus the final wait for an acknowledgement
    pub fn max_transmit_wait(&self) -> Duration {
        let millis = ((1u64 << (self.max_retransmissions + 1)) - 1) as f64
            * self.ack_timeout.as_millis() as f64
            * self.ack_random_factor;
        Duration::from_millis(millis as u64)
    }

    /// Upper bound for the time from the initial send of a confirmable message until its
    ///  message id can no longer be matched by the receiver's duplicate detection. A message id
    ///  is not reused to the same endpoint within this time.
    pub fn exchange_lifetime(&self) -> Duration {
        self.max_transmit_span() + 2 * MAX_LATENCY + self.ack_timeout
    }
}
