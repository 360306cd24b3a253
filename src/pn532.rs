/// PN532 NFC controller over I2C — the `NfcHardware` implementation for the
/// Imperium board.
///
/// Host frames (normal information frame):
///   [0x00 preamble] [0x00 0xFF start] [LEN] [LCS] [0xD4 TFI] [CMD] [params...] [DCS] [0x00]
/// LEN counts TFI + CMD + params; LEN + LCS == 0 and TFI + CMD + params + DCS == 0 (mod 256).
///
/// Every I2C read from the chip starts with a status byte (bit 0 = ready).
/// After a command the chip first answers with an ACK frame, then (once ready
/// again) with the response frame whose TFI is 0xD5 and CMD is the request + 1.
///
/// With SAM configured to drive the IRQ line, `InListPassiveTarget` is issued
/// on arm and left pending: the chip pulls IRQ low once a target is in the
/// field, and `query_target` collects that pending response.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{I2c, SevenBitAddress};
use heapless::Vec;

use crate::reader::{NfcHardware, Target, Uid, BLOCK_LEN};

/// 7-bit I2C address of the PN532.
pub const I2C_ADDRESS: SevenBitAddress = 0x24;

const TFI_HOST_TO_PN532: u8 = 0xD4;
const TFI_PN532_TO_HOST: u8 = 0xD5;

const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// Largest command frame the driver builds.
const MAX_FRAME_LEN: usize = 32;

/// Bytes read for a response: status byte + frame.
const RESPONSE_READ_LEN: usize = 64;

const RESET_HOLD_MS: u32 = 100;
const RESET_SETTLE_MS: u32 = 10;
const ACK_TIMEOUT_MS: u32 = 10;
const COMMAND_TIMEOUT_MS: u32 = 100;

pub mod command {
    pub const GET_FIRMWARE_VERSION: u8 = 0x02;
    pub const SAM_CONFIGURATION: u8 = 0x14;
    pub const IN_DATA_EXCHANGE: u8 = 0x40;
    pub const IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
}

/// SAM normal mode, 1 s virtual card timeout, drive the IRQ pin.
const SAM_NORMAL_WITH_IRQ: [u8; 3] = [0x01, 0x14, 0x01];

/// Baud rate / modulation for ISO14443A at 106 kbps.
const BRTY_ISO14443A: u8 = 0x00;

/// Type 2 tag READ (returns four pages).
const TYPE2_READ: u8 = 0x30;

/// PN532 driver errors, generic over the bus error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    I2c(E),
    /// Driving the reset pin failed.
    Reset,
    /// The chip did not become ready in time.
    Timeout,
    /// Expected an ACK frame, got something else.
    BadAck,
    /// Response frame failed preamble, checksum, or TFI/command checks.
    BadFrame,
    /// Non-zero status byte from `InDataExchange`.
    Status(u8),
}

/// Build a host-to-PN532 command frame.
///
/// Returns `None` if the parameters do not fit in a frame.
pub fn encode_frame(command: u8, params: &[u8]) -> Option<Vec<u8, MAX_FRAME_LEN>> {
    let len = u8::try_from(params.len() + 2).ok()?;
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0x00, 0x00, 0xFF, len, len.wrapping_neg()]).ok()?;
    frame.extend_from_slice(&[TFI_HOST_TO_PN532, command]).ok()?;
    frame.extend_from_slice(params).ok()?;
    let sum = params
        .iter()
        .fold(TFI_HOST_TO_PN532.wrapping_add(command), |acc, &b| acc.wrapping_add(b));
    frame.extend_from_slice(&[sum.wrapping_neg(), 0x00]).ok()?;
    Some(frame)
}

/// Validate a PN532-to-host response frame for `command` and return its data.
///
/// `frame` starts after the I2C status byte; leading preamble bytes are optional.
pub fn decode_response(command: u8, frame: &[u8]) -> Option<&[u8]> {
    let start = frame.windows(2).position(|w| w == [0x00, 0xFF])? + 2;
    let len = *frame.get(start)?;
    let lcs = *frame.get(start + 1)?;
    if len.wrapping_add(lcs) != 0 || len < 2 {
        return None;
    }
    let body = frame.get(start + 2..start + 2 + len as usize)?;
    let dcs = *frame.get(start + 2 + len as usize)?;
    let sum = body.iter().fold(dcs, |acc, &b| acc.wrapping_add(b));
    if sum != 0 || body[0] != TFI_PN532_TO_HOST || body[1] != command.wrapping_add(1) {
        return None;
    }
    Some(&body[2..])
}

/// PN532 on an I2C bus with its reset line.
pub struct Pn532<I2C, RST, D> {
    i2c: I2C,
    rst: RST,
    delay: D,
}

impl<I2C, RST, D, E> Pn532<I2C, RST, D>
where
    I2C: I2c<SevenBitAddress, Error = E>,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(i2c: I2C, rst: RST, delay: D) -> Self {
        Self { i2c, rst, delay }
    }

    pub fn release(self) -> (I2C, RST, D) {
        (self.i2c, self.rst, self.delay)
    }

    /// Firmware version word: IC, version, revision, supported protocols.
    pub fn firmware_version(&mut self) -> Result<u32, Error<E>> {
        let mut buf = [0u8; RESPONSE_READ_LEN];
        let data = self.exchange(command::GET_FIRMWARE_VERSION, &[], COMMAND_TIMEOUT_MS, &mut buf)?;
        let bytes: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::BadFrame)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Poll the status byte until the chip reports ready.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<bool, Error<E>> {
        let mut status = [0u8; 1];
        for _ in 0..=timeout_ms {
            self.i2c.read(I2C_ADDRESS, &mut status).map_err(Error::I2c)?;
            if status[0] & 0x01 != 0 {
                return Ok(true);
            }
            self.delay.delay_ms(1);
        }
        Ok(false)
    }

    /// Send a command frame and consume its ACK.
    fn write_command(&mut self, command: u8, params: &[u8]) -> Result<(), Error<E>> {
        let frame = encode_frame(command, params).ok_or(Error::BadFrame)?;
        self.i2c.write(I2C_ADDRESS, &frame).map_err(Error::I2c)?;

        if !self.wait_ready(ACK_TIMEOUT_MS)? {
            return Err(Error::Timeout);
        }
        let mut ack = [0u8; 1 + ACK_FRAME.len()];
        self.i2c.read(I2C_ADDRESS, &mut ack).map_err(Error::I2c)?;
        if ack[1..] != ACK_FRAME {
            return Err(Error::BadAck);
        }
        Ok(())
    }

    fn read_response<'b>(&mut self, command: u8, buf: &'b mut [u8]) -> Result<&'b [u8], Error<E>> {
        self.i2c.read(I2C_ADDRESS, buf).map_err(Error::I2c)?;
        decode_response(command, &buf[1..]).ok_or(Error::BadFrame)
    }

    /// Full command round trip: frame, ACK, wait, response.
    fn exchange<'b>(
        &mut self,
        command: u8,
        params: &[u8],
        timeout_ms: u32,
        buf: &'b mut [u8],
    ) -> Result<&'b [u8], Error<E>> {
        self.write_command(command, params)?;
        if !self.wait_ready(timeout_ms)? {
            return Err(Error::Timeout);
        }
        self.read_response(command, buf)
    }
}

impl<I2C, RST, D, E> NfcHardware for Pn532<I2C, RST, D>
where
    I2C: I2c<SevenBitAddress, Error = E>,
    RST: OutputPin,
    D: DelayNs,
    E: core::fmt::Debug,
{
    type Error = Error<E>;

    fn start(&mut self) -> Result<(), Self::Error> {
        self.rst.set_low().map_err(|_| Error::Reset)?;
        self.delay.delay_ms(RESET_HOLD_MS);
        self.rst.set_high().map_err(|_| Error::Reset)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        match self.firmware_version() {
            Ok(version) => log::info!(
                "PN532 found: IC {:02X}, firmware {}.{}",
                version >> 24,
                (version >> 16) & 0xFF,
                (version >> 8) & 0xFF
            ),
            Err(e) => log::warn!("PN532 not found: {:?}", e),
        }

        let mut buf = [0u8; RESPONSE_READ_LEN];
        self.exchange(
            command::SAM_CONFIGURATION,
            &SAM_NORMAL_WITH_IRQ,
            COMMAND_TIMEOUT_MS,
            &mut buf,
        )?;
        log::info!("NFC reader ready");
        Ok(())
    }

    fn arm(&mut self) -> Result<(), Self::Error> {
        self.write_command(command::IN_LIST_PASSIVE_TARGET, &[0x01, BRTY_ISO14443A])
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        // Held in reset, the chip draws its minimum current.
        self.rst.set_low().map_err(|_| Error::Reset)
    }

    fn query_target(&mut self, timeout_ms: u32) -> Result<Option<Target>, Self::Error> {
        if !self.wait_ready(timeout_ms)? {
            return Ok(None);
        }
        let mut buf = [0u8; RESPONSE_READ_LEN];
        let data = self.read_response(command::IN_LIST_PASSIVE_TARGET, &mut buf)?;

        // [NbTg] [Tg] [SENS_RES x2] [SEL_RES] [NFCIDLength] [NFCID...]
        match data.first() {
            Some(0) => return Ok(None),
            Some(_) => {}
            None => return Err(Error::BadFrame),
        }
        let number = *data.get(1).ok_or(Error::BadFrame)?;
        let uid_len = *data.get(5).ok_or(Error::BadFrame)? as usize;
        let uid_bytes = data.get(6..6 + uid_len).ok_or(Error::BadFrame)?;
        let uid = Uid::from_slice(uid_bytes).map_err(|_| Error::BadFrame)?;
        Ok(Some(Target { number, uid }))
    }

    fn read_block(
        &mut self,
        target: &Target,
        page: u8,
        block: &mut [u8; BLOCK_LEN],
    ) -> Result<(), Self::Error> {
        let mut buf = [0u8; RESPONSE_READ_LEN];
        let data = self.exchange(
            command::IN_DATA_EXCHANGE,
            &[target.number, TYPE2_READ, page],
            COMMAND_TIMEOUT_MS,
            &mut buf,
        )?;
        let status = *data.first().ok_or(Error::BadFrame)?;
        if status & 0x3F != 0 {
            return Err(Error::Status(status));
        }
        let bytes = data.get(1..1 + BLOCK_LEN).ok_or(Error::BadFrame)?;
        block.copy_from_slice(bytes);
        Ok(())
    }
}
