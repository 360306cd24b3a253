/// Foreground relay pipeline: arbiter → reader → publisher.
///
/// One [`RelayPipeline::step`] per foreground tick. A step does nothing
/// unless the arbiter signals a read, and a failed read is just logged: the
/// cooldown has already started by then and detection re-arms on schedule.
use crate::config::PAYLOAD_CAPACITY;
use crate::detect::{DetectionArbiter, DetectionState, InterruptLine};
use crate::reader::{NfcHardware, ReadError, TagReader, TagRecord};
use crate::relay::{PublishOutcome, RelayPublisher, RelaySink};

/// What one [`RelayPipeline::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<const N: usize = PAYLOAD_CAPACITY> {
    /// No read was due.
    Idle,
    ReadFailed(ReadError),
    /// Payload written to the characteristic and notified.
    Relayed(TagRecord<N>),
    /// Tag read fine but no host was linked.
    Dropped(TagRecord<N>),
}

/// Interrupt line wrapper that restarts passive detection on the reader
/// before the line is enabled. The PN532 only raises IRQ for a target it
/// was asked to look for, so the line stays off if that request fails.
struct Rearm<'r, H, L, const N: usize> {
    reader: &'r mut TagReader<H, N>,
    line: &'r mut L,
}

impl<H: NfcHardware, L: InterruptLine, const N: usize> InterruptLine for Rearm<'_, H, L, N> {
    fn enable(&mut self) -> bool {
        if let Err(e) = self.reader.arm() {
            log::warn!("Failed to start passive detection: {:?}", e);
            return false;
        }
        self.line.enable()
    }

    fn disable(&mut self) {
        self.line.disable();
    }
}

pub struct RelayPipeline<'a, H, const N: usize = PAYLOAD_CAPACITY> {
    arbiter: &'a DetectionArbiter,
    reader: TagReader<H, N>,
    publisher: RelayPublisher<'a>,
}

impl<'a, H: NfcHardware, const N: usize> RelayPipeline<'a, H, N> {
    /// The arbiter and the reader must be built from the same [`RelayConfig`].
    ///
    /// [`RelayConfig`]: crate::config::RelayConfig
    pub fn new(
        arbiter: &'a DetectionArbiter,
        reader: TagReader<H, N>,
        publisher: RelayPublisher<'a>,
    ) -> Self {
        debug_assert_eq!(
            arbiter.cooldown_ms(),
            reader.config().cooldown_ms,
            "arbiter and reader disagree on the cooldown"
        );
        Self {
            arbiter,
            reader,
            publisher,
        }
    }

    pub fn detection_state(&self) -> DetectionState {
        self.arbiter.state()
    }

    pub fn reader(&self) -> &TagReader<H, N> {
        &self.reader
    }

    /// Bring the reader up and arm detection for the first tag.
    ///
    /// A reader that fails to start is logged; detection is armed anyway so a
    /// chip that comes up late still gets a chance. If arming fails the
    /// arbiter cools down from `now_ms` and retries when that expires.
    pub fn start<L: InterruptLine>(&mut self, now_ms: u32, line: &mut L) {
        if let Err(e) = self.reader.start() {
            log::warn!("NFC reader start failed: {:?}", e);
        }
        let mut rearm = Rearm {
            reader: &mut self.reader,
            line,
        };
        if self.arbiter.arm_detection(now_ms, &mut rearm) {
            log::info!("Tag detection armed");
        } else {
            log::warn!("Tag detection not armed, retrying after cooldown");
        }
    }

    /// Run one foreground tick.
    pub fn step<L: InterruptLine, S: RelaySink>(
        &mut self,
        now_ms: u32,
        line: &mut L,
        sink: &mut S,
    ) -> StepOutcome<N> {
        let mut rearm = Rearm {
            reader: &mut self.reader,
            line,
        };
        if self.arbiter.poll(now_ms, &mut rearm).is_none() {
            return StepOutcome::Idle;
        }

        let record = match self.reader.attempt_read() {
            Ok(record) => record,
            Err(e) => {
                log::info!("Tag read failed: {}", e);
                return StepOutcome::ReadFailed(e);
            }
        };

        match self.publisher.publish(&record.payload, sink) {
            PublishOutcome::Sent => StepOutcome::Relayed(record),
            PublishOutcome::Dropped => StepOutcome::Dropped(record),
        }
    }

    /// Put the reader to sleep. Detection stays where it is; the next
    /// re-arm wakes nothing, so callers should only do this on shutdown.
    pub fn sleep(&mut self) {
        if let Err(e) = self.reader.sleep() {
            log::warn!("NFC reader sleep failed: {:?}", e);
        }
    }
}
