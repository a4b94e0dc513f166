//! Periodic keepalive ping.
//!
//! The server expects a reply-less ping at a fixed interval. The first ping
//! goes out one full interval after the connection starts; missed ticks
//! (a stalled write, a suspended host) are skipped rather than bunched up.

use std::future::Future;
use std::time::Duration;

use kelimelik_protocol::Packet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::ClientError;

pub(crate) struct Keepalive {
    interval: Duration,
    ping: Packet,
}

impl Keepalive {
    /// Returns `None` for a zero interval, which disables the keepalive.
    pub(crate) fn new(interval: Duration, ping_header: String) -> Option<Self> {
        if interval.is_zero() {
            debug!("keepalive disabled");
            return None;
        }
        Some(Self {
            interval,
            ping: Packet::new(ping_header),
        })
    }

    /// Sends a ping every interval, forever. Stopped by aborting its task.
    pub(crate) async fn run<F, Fut>(self, mut send: F)
    where
        F: FnMut(Packet) -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            trace!(header = %self.ping.header, "sending keepalive");
            if let Err(e) = send(self.ping.clone()).await {
                debug!(error = %e, "keepalive ping failed");
            }
        }
    }
}
