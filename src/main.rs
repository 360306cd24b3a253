//! Imperium — BLE gamepad NFC tag relay
//!
//! A PN532 on I2C raises its IRQ line when a tag enters the field. The
//! interrupt handler flips the detection arbiter, the NFC task reads the
//! tag, and the first NDEF record's sanitized payload is notified on the
//! NFC characteristic if a host is connected.
//!
//! Diagnostics are logged on serial as NDJSON.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::cell::RefCell;
use critical_section::Mutex;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::delay::Delay;
use esp_hal::gpio::{Event, Input, InputConfig, Io, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::{handler, ram, Blocking};
use static_cell::StaticCell;

use trouble_host::prelude::*;

use imperium::config::RelayConfig;
use imperium::detect::{DetectionArbiter, InterruptLine};
use imperium::pipeline::{RelayPipeline, StepOutcome};
use imperium::pn532::Pn532;
use imperium::protocol::{DeviceMessage, MsgBuffer, MAX_MSG_LEN, VERSION};
use imperium::reader::{format_uid, TagReader, TagRecord, UidString};
use imperium::relay::{ConnectionFlag, RelayPublisher, RelaySink};
use imperium::{board, comm};

// ── BLE GATT server definition ──────────────────────────────────────
//
// Proc macros require string literals; comm::ble_uuids holds the same
// UUIDs as the canonical source.

/// NFC characteristic value: sanitized payload bytes, no framing.
type NfcValue = heapless::Vec<u8, { comm::NFC_VALUE_LEN }>;

#[gatt_service(uuid = "CE00299E-EA4B-4BB6-B631-A93F4F16E71B")]
struct NfcService {
    /// Last relayed tag payload. Notified on every relay; host writes are
    /// accepted and ignored.
    #[characteristic(uuid = "8CD024AE-4EA5-4F06-9836-D5CA72976A40", read, write, notify)]
    nfc: NfcValue,
}

/// Device Information (0x180A): manufacturer name and PnP ID.
#[gatt_service(uuid = "180a")]
struct DeviceInformationService {
    #[characteristic(uuid = "2a29", read, value = *comm::BLE_MANUFACTURER)]
    manufacturer: [u8; 8],
    #[characteristic(uuid = "2a50", read, value = comm::pnp_id())]
    pnp_id: [u8; 7],
}

#[gatt_server]
struct ImperiumServer {
    nfc_service: NfcService,
    device_info: DeviceInformationService,
}

// ── Static state ─────────────────────────────────────────────────────

const RELAY_CONFIG: RelayConfig = RelayConfig::new();

/// Foreground tick for the relay pipeline
const POLL_INTERVAL_MS: u64 = 20;

type NfcReader = Pn532<I2c<'static, Blocking>, Output<'static>, Delay>;
type DiagnosticsChannel = Channel<CriticalSectionRawMutex, MsgBuffer, 4>;

/// Detection state machine, shared with the GPIO interrupt handler
static ARBITER: DetectionArbiter = DetectionArbiter::new(RELAY_CONFIG);

/// Host link state. Written only by the GATT connection loop below.
static LINK: ConnectionFlag = ConnectionFlag::new();

/// Latest payload waiting to be notified. A `Signal` keeps only the newest
/// value, and it is reset on every new connection so nothing is replayed.
static OUTBOX: Signal<CriticalSectionRawMutex, NfcValue> = Signal::new();

/// Serialized NDJSON diagnostics for the serial log
static DIAGNOSTICS: DiagnosticsChannel = Channel::new();

/// PN532 IRQ input, shared between the handler and the NFC task
static NFC_IRQ: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

fn now_ms() -> u32 {
    (Instant::now().as_millis() & 0xFFFF_FFFF) as u32
}

// ── Interrupt line ──────────────────────────────────────────────────

/// Enables and disables the level interrupt on the PN532 IRQ pin.
struct IrqLine<'p>(&'p mut Input<'static>);

impl InterruptLine for IrqLine<'_> {
    fn enable(&mut self) -> bool {
        self.0.listen(Event::LowLevel);
        true
    }

    fn disable(&mut self) {
        self.0.unlisten();
    }
}

/// Foreground access to the shared IRQ pin.
struct SharedIrqLine;

impl InterruptLine for SharedIrqLine {
    fn enable(&mut self) -> bool {
        critical_section::with(|cs| match NFC_IRQ.borrow_ref_mut(cs).as_mut() {
            Some(pin) => IrqLine(pin).enable(),
            None => false,
        })
    }

    fn disable(&mut self) {
        critical_section::with(|cs| {
            if let Some(pin) = NFC_IRQ.borrow_ref_mut(cs).as_mut() {
                IrqLine(pin).disable();
            }
        });
    }
}

#[handler]
#[ram]
fn nfc_irq_handler() {
    critical_section::with(|cs| {
        if let Some(pin) = NFC_IRQ.borrow_ref_mut(cs).as_mut() {
            if pin.is_interrupt_set() {
                ARBITER.on_edge_detected(&mut IrqLine(pin));
                pin.clear_interrupt();
            }
        }
    });
}

// ── Relay sink ──────────────────────────────────────────────────────

/// Hands relayed payloads to the GATT connection loop.
struct OutboxSink {
    value: NfcValue,
}

impl RelaySink for OutboxSink {
    fn set_value(&mut self, value: &[u8]) {
        self.value.clear();
        let len = value.len().min(comm::NFC_VALUE_LEN);
        let _ = self.value.extend_from_slice(&value[..len]);
    }

    fn notify(&mut self) {
        OUTBOX.signal(self.value.clone());
    }
}

// ── Diagnostics ─────────────────────────────────────────────────────

fn emit(msg: &DeviceMessage) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        let _ = DIAGNOSTICS.try_send(buf);
    }
}

fn emit_tag(record: &TagRecord, relayed: bool, ts: u32) {
    let mut uid = UidString::new();
    format_uid(&record.uid, &mut uid);
    emit(&DeviceMessage::Tag {
        uid: &uid,
        kind: record.kind.as_str(),
        payload: record.payload.as_str(),
        relayed,
        ts,
    });
}

fn emit_link(connected: bool) {
    emit(&DeviceMessage::Link {
        connected,
        ts: now_ms(),
    });
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // BLE controller needs heap
    esp_alloc::heap_allocator!(size: 72 * 1024);

    // Start the RTOS — requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("Imperium v{} starting on {}", VERSION, board::BOARD_NAME);

    // ── NFC reader ─────────────────────────────────────────────────────

    // Peripheral fields are per-pin types, so the wiring is spelled out below.
    const _: () = assert!(
        board::NFC_SDA_PIN == 8
            && board::NFC_SCL_PIN == 9
            && board::NFC_IRQ_PIN == 10
            && board::NFC_RST_PIN == 11,
        "board pin map does not match the GPIOs taken in main"
    );

    let i2c = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(board::NFC_I2C_KHZ)),
    )
    .expect("I2C init failed")
    .with_sda(peripherals.GPIO8)
    .with_scl(peripherals.GPIO9);
    let rst = Output::new(peripherals.GPIO11, Level::High, OutputConfig::default());
    let reader: TagReader<NfcReader> =
        TagReader::new(Pn532::new(i2c, rst, Delay::new()), RELAY_CONFIG);

    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(nfc_irq_handler);
    let irq = Input::new(
        peripherals.GPIO10,
        InputConfig::default().with_pull(Pull::Up),
    );
    critical_section::with(|cs| NFC_IRQ.borrow_ref_mut(cs).replace(irq));

    let pipeline = RelayPipeline::new(&ARBITER, reader, RelayPublisher::new(&LINK));

    spawner.spawn(nfc_task(pipeline)).unwrap();
    spawner.spawn(diagnostics_task()).unwrap();
    spawner.spawn(status_task()).unwrap();

    // ── BLE radio initialization ───────────────────────────────────────

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");
    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xac]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    let server = ImperiumServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: comm::BLE_ADV_NAME,
        appearance: &appearance::human_interface_device::GAMEPAD,
    }))
    .expect("GATT server init failed");

    let mut initial = NfcValue::new();
    let _ = initial.extend_from_slice(comm::INITIAL_NFC_VALUE);
    if let Err(e) = server.set(&server.nfc_service.nfc, &initial) {
        log::warn!("Failed to set initial NFC value: {:?}", e);
    }

    // ── BLE orchestration ──────────────────────────────────────────────
    //
    // Two concurrent futures:
    //   1. BLE stack runner (drives HCI)
    //   2. GATT server (advertise, accept connections, send notifications)

    let _ = embassy_futures::join::join(
        // ── Runner: drives the BLE stack ────────────────────────────────
        async {
            loop {
                if let Err(e) = runner.run().await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        // ── GATT server: advertise, connect, notify ─────────────────────
        async {
            loop {
                let mut adv_data = [0u8; 31];
                let adv_len = match AdStructure::encode_slice(
                    &[
                        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                        AdStructure::CompleteLocalName(comm::BLE_ADV_NAME.as_bytes()),
                    ],
                    &mut adv_data[..],
                ) {
                    Ok(len) => len,
                    Err(e) => {
                        log::error!("Ad encode error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let advertiser = match peripheral
                    .advertise(
                        &Default::default(),
                        Advertisement::ConnectableScannableUndirected {
                            adv_data: &adv_data[..adv_len],
                            scan_data: &[],
                        },
                    )
                    .await
                {
                    Ok(adv) => adv,
                    Err(e) => {
                        log::error!("BLE advertise error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                log::info!("BLE advertising as '{}'", comm::BLE_ADV_NAME);

                let conn = match advertiser.accept().await {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("BLE accept error: {:?}", e);
                        continue;
                    }
                };

                let params = ConnectParams {
                    min_connection_interval: Duration::from_micros(comm::CONN_INTERVAL_MIN_US),
                    max_connection_interval: Duration::from_micros(comm::CONN_INTERVAL_MAX_US),
                    max_latency: comm::CONN_LATENCY,
                    supervision_timeout: Duration::from_millis(comm::CONN_SUPERVISION_TIMEOUT_MS),
                    ..Default::default()
                };
                if let Err(e) = conn.update_connection_params(&stack, &params).await {
                    log::warn!("Connection parameter update rejected: {:?}", e);
                }

                let gatt_conn = match conn.with_attribute_server(&server) {
                    Ok(gc) => gc,
                    Err(e) => {
                        log::error!("GATT setup error: {:?}", e);
                        continue;
                    }
                };

                log::info!("BLE connected");
                LINK.on_link_established();
                emit_link(true);

                handle_gatt_connection(&gatt_conn, &server).await;

                LINK.on_link_lost();
                emit_link(false);
                log::info!("BLE disconnected, re-advertising");
            }
        },
    )
    .await;
}

/// Handle a GATT connection: forward relayed payloads as notifications and
/// answer attribute requests until the host disconnects.
async fn handle_gatt_connection<'s, P: PacketPool>(
    conn: &GattConnection<'_, 's, P>,
    server: &'s ImperiumServer<'_>,
) {
    // Anything signalled while no host was linked is stale
    OUTBOX.reset();

    loop {
        match select(OUTBOX.wait(), conn.next()).await {
            Either::First(value) => {
                if server
                    .nfc_service
                    .nfc
                    .notify(conn, &value)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Either::Second(event) => match event {
                GattConnectionEvent::Disconnected { .. } => return,
                GattConnectionEvent::Gatt { event } => {
                    if let GattEvent::Write(ref write_event) = event {
                        if write_event.handle() == server.nfc_service.nfc.handle {
                            log::debug!("Ignoring {} byte host write", write_event.data().len());
                        }
                    }
                    // Must accept/reply to all GATT events
                    match event.accept() {
                        Ok(reply) => reply.send().await,
                        Err(_) => {}
                    }
                }
                _ => {}
            },
        }
    }
}

/// Relay task — drives the pipeline at a fixed tick and reports outcomes.
#[embassy_executor::task]
async fn nfc_task(mut pipeline: RelayPipeline<'static, NfcReader>) {
    log::info!("NFC task started");

    let mut line = SharedIrqLine;
    let mut sink = OutboxSink {
        value: NfcValue::new(),
    };
    pipeline.start(now_ms(), &mut line);

    let mut ticker = Ticker::every(Duration::from_millis(POLL_INTERVAL_MS));
    loop {
        ticker.next().await;
        let now = now_ms();
        match pipeline.step(now, &mut line, &mut sink) {
            StepOutcome::Idle => {}
            StepOutcome::ReadFailed(e) => emit(&DeviceMessage::ReadError {
                error: e.as_str(),
                ts: now,
            }),
            StepOutcome::Relayed(record) => emit_tag(&record, true, now),
            StepOutcome::Dropped(record) => emit_tag(&record, false, now),
        }
    }
}

/// Serial diagnostics task — logs each NDJSON line.
#[embassy_executor::task]
async fn diagnostics_task() {
    let rx = DIAGNOSTICS.receiver();
    loop {
        let msg = rx.receive().await;
        if let Ok(s) = core::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

/// Periodic status reporting task
#[embassy_executor::task]
async fn status_task() {
    loop {
        Timer::after(Duration::from_secs(30)).await;

        emit(&DeviceMessage::Status {
            connected: LINK.is_connected(),
            detection: ARBITER.state().as_str(),
            uptime: (Instant::now().as_millis() / 1000) as u32,
            heap_free: esp_alloc::HEAP.free() as u32,
            board: board::BOARD_NAME,
            version: VERSION,
        });
    }
}
