/// Relay publisher and connection state.
///
/// [`ConnectionFlag`] is the one process-wide "is a host linked" bit.
/// Writers: the BLE link lifecycle callbacks (`on_link_established`,
/// `on_link_lost`) and nothing else. Reader: [`RelayPublisher`] (plus
/// diagnostics). A stale-by-one read costs at most one extra drop or one
/// extra notify attempt, so a relaxed atomic is enough.
///
/// Publishing is connection-gated and fire-and-forget. While disconnected a
/// payload is simply discarded: there is no queue and nothing is replayed
/// on reconnect.
use core::sync::atomic::{AtomicBool, Ordering};

use crate::sanitize::SanitizedPayload;

/// Process-wide link state.
pub struct ConnectionFlag {
    connected: AtomicBool,
}

impl ConnectionFlag {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
        }
    }

    /// Link lifecycle callback: a host connected.
    pub fn on_link_established(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    /// Link lifecycle callback: the host went away.
    pub fn on_link_lost(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound notify characteristic, as seen from the relay.
pub trait RelaySink {
    /// Replace the characteristic value.
    fn set_value(&mut self, value: &[u8]);
    /// Push the current value to the linked peer.
    fn notify(&mut self);
}

/// What [`RelayPublisher::publish`] did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    /// No host linked; payload discarded.
    Dropped,
}

/// Connection-gated publisher.
#[derive(Clone, Copy)]
pub struct RelayPublisher<'a> {
    link: &'a ConnectionFlag,
}

impl<'a> RelayPublisher<'a> {
    pub const fn new(link: &'a ConnectionFlag) -> Self {
        Self { link }
    }

    /// Write the payload into the characteristic and notify, only if linked.
    ///
    /// The sink is not touched at all while disconnected.
    pub fn publish<const N: usize, S: RelaySink>(
        &self,
        payload: &SanitizedPayload<N>,
        sink: &mut S,
    ) -> PublishOutcome {
        if !self.link.is_connected() {
            log::debug!("No host linked, dropping payload '{}'", payload);
            return PublishOutcome::Dropped;
        }
        sink.set_value(payload.as_bytes());
        sink.notify();
        PublishOutcome::Sent
    }
}
