/// Detection arbiter — decides *when* a tag read is attempted.
///
/// Three states share one atomic word so the GPIO interrupt handler and the
/// foreground loop never lose a transition:
///
/// ```text
///   arm_detection()        on_edge_detected()        poll(): read signalled
///  ───────────────► Armed ───────────────────► Pending ─────────────────────► Cooldown
///                     ▲                                                          │
///                     └──────────────── poll(): cooldown elapsed ────────────────┘
/// ```
///
/// The interrupt handler only ever performs `Armed → Pending` (compare-and-swap)
/// and disables the line. Everything else happens in `poll()`. While in
/// `Cooldown` the line stays disabled, so no edge can sneak in until re-arm.
/// A re-arm whose line refuses to enable goes straight back to `Cooldown`.
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::config::RelayConfig;

/// Interrupt line from the reader's IRQ output.
///
/// `disable` is called from interrupt context and must be ISR-safe
/// (a register write, nothing more).
pub trait InterruptLine {
    /// Start listening. Returns `false` if detection could not be started,
    /// in which case the line must be left disabled.
    fn enable(&mut self) -> bool;
    fn disable(&mut self);
}

/// Arbiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetectionState {
    /// Interrupt enabled, waiting for the reader to signal a target.
    Armed = 0,
    /// Interrupt observed, read not yet attempted.
    Pending = 1,
    /// A read was attempted; re-arm is time-gated.
    Cooldown = 2,
}

impl DetectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DetectionState::Armed,
            1 => DetectionState::Pending,
            _ => DetectionState::Cooldown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Armed => "armed",
            DetectionState::Pending => "pending",
            DetectionState::Cooldown => "cooldown",
        }
    }
}

/// Signal from [`DetectionArbiter::poll`] that a read should be attempted now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAttempt {
    /// Timestamp (ms) at which the cooldown window started.
    pub started_ms: u32,
}

/// The single detection state machine. Lives in a `static`.
pub struct DetectionArbiter {
    state: AtomicU8,
    /// Cooldown start; written and read by the foreground only.
    cooldown_started_ms: AtomicU32,
    cooldown_ms: u32,
}

impl DetectionArbiter {
    /// Starts in `Cooldown` with the line untouched; nothing fires until
    /// [`arm_detection`](Self::arm_detection) runs at startup.
    pub const fn new(config: RelayConfig) -> Self {
        Self {
            state: AtomicU8::new(DetectionState::Cooldown as u8),
            cooldown_started_ms: AtomicU32::new(0),
            cooldown_ms: config.cooldown_ms,
        }
    }

    pub fn state(&self) -> DetectionState {
        DetectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn cooldown_ms(&self) -> u32 {
        self.cooldown_ms
    }

    /// Set `Armed`, then enable the line.
    ///
    /// The state is published first so an interrupt that fires the moment the
    /// line is enabled already sees `Armed`. If the line cannot be enabled the
    /// arbiter falls back to `Cooldown` starting at `now_ms`, so the next
    /// expiry tries again. Returns whether detection is live.
    pub fn arm_detection<L: InterruptLine>(&self, now_ms: u32, line: &mut L) -> bool {
        self.state.store(DetectionState::Armed as u8, Ordering::Release);
        if line.enable() {
            return true;
        }
        self.cooldown_started_ms.store(now_ms, Ordering::Relaxed);
        self.state.store(DetectionState::Cooldown as u8, Ordering::Release);
        false
    }

    /// Interrupt context. `Armed → Pending` and disable the line; a no-op in
    /// any other state. No logging, no allocation, no blocking.
    pub fn on_edge_detected<L: InterruptLine>(&self, line: &mut L) {
        if self
            .state
            .compare_exchange(
                DetectionState::Armed as u8,
                DetectionState::Pending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            line.disable();
        }
    }

    /// Foreground. Returns `Some` exactly once per observed edge.
    ///
    /// `line` is only touched when a cooldown expires and detection is re-armed.
    pub fn poll<L: InterruptLine>(&self, now_ms: u32, line: &mut L) -> Option<ReadAttempt> {
        match self.state() {
            DetectionState::Armed => None,
            DetectionState::Pending => {
                // Optimistic: the cooldown starts whether or not the read succeeds.
                self.cooldown_started_ms.store(now_ms, Ordering::Relaxed);
                self.state
                    .compare_exchange(
                        DetectionState::Pending as u8,
                        DetectionState::Cooldown as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .ok()
                    .map(|_| ReadAttempt { started_ms: now_ms })
            }
            DetectionState::Cooldown => {
                let started = self.cooldown_started_ms.load(Ordering::Relaxed);
                if now_ms.wrapping_sub(started) >= self.cooldown_ms {
                    log::debug!("Cooldown elapsed, re-arming detection");
                    if !self.arm_detection(now_ms, line) {
                        log::warn!("Re-arm failed, retrying in {} ms", self.cooldown_ms);
                    }
                }
                None
            }
        }
    }
}
