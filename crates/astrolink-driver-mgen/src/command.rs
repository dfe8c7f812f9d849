//! MGEN autoguider binary protocol codec.
//!
//! Protocol Overview:
//! - Format: framed binary command/response over a USB-serial bridge
//! - Framing: one sub-command opcode byte, then exactly one status byte from
//!   the device, then (on `0x00`) command parameters followed by a fixed
//!   number of response bytes
//! - Multi-byte integers: little-endian, least-significant byte first;
//!   signed 16-bit fields are two's-complement
//!
//! Status byte contract: `0x00` means proceed. The sentinel block
//! `0xF0..=0xF4` signals well-defined device-busy conditions (camera off,
//! auto-guiding active, another command in progress, UI locked, cannot do
//! functions). Anything else is an unexpected return code - usually a stale
//! or garbled byte, which is the one condition the executor retries.
//!
//! The boot-mode dialect is the exception to the framing rule: the
//! handshake opcode `0xAA` is answered with the complement byte `0x55`
//! directly, with no status byte in front. [`ProbeBoot`] is the only
//! command using that path.
//!
//! The codec classifies and decodes; it never retries and never logs above
//! trace level.

use astrolink_core::error::{DeviceError, DeviceResult};
use astrolink_core::transport::Transport;
use std::time::Duration;

// =============================================================================
// Opcodes and status bytes
// =============================================================================

pub const OP_NOOP: u8 = 0x00;
pub const OP_FIRMWARE_VERSION: u8 = 0x05;
pub const OP_UPTIME: u8 = 0x06;
pub const OP_SET_IMAGING_PARAMS: u8 = 0x10;
pub const OP_SEARCH_STAR: u8 = 0x12;
pub const OP_GET_STAR_DATA: u8 = 0x13;
pub const OP_START_CALIBRATION: u8 = 0x20;
pub const OP_QUERY_CALIBRATION: u8 = 0x21;
pub const OP_CANCEL_CALIBRATION: u8 = 0x22;
pub const OP_START_GUIDING: u8 = 0x30;
pub const OP_STOP_GUIDING: u8 = 0x31;
pub const OP_QUERY_GUIDE_STATE: u8 = 0x32;
pub const OP_START_DITHER: u8 = 0x33;
pub const OP_QUERY_DITHER_STATE: u8 = 0x34;
pub const OP_BOOT_PING: u8 = 0xAA;

/// Status byte: proceed / success.
pub const STATUS_OK: u8 = 0x00;
/// Status byte: camera is powered off.
pub const STATUS_CAMERA_OFF: u8 = 0xF0;
/// Status byte: auto-guiding is active and blocks this command.
pub const STATUS_AUTOGUIDING_ACTIVE: u8 = 0xF1;
/// Status byte: another command is still in progress.
pub const STATUS_COMMAND_IN_PROGRESS: u8 = 0xF2;
/// Status byte: device UI holds the command lock.
pub const STATUS_UI_LOCKED: u8 = 0xF3;
/// Status byte: function class unavailable in the current device mode.
pub const STATUS_CANNOT_DO_FUNCTIONS: u8 = 0xF4;

/// Expected reply to the boot-dialect handshake (complement of `0xAA`).
pub const BOOT_PING_REPLY: u8 = 0x55;

/// Default per-command timeout, matching the bridge driver's configured
/// read/write timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Map a status byte onto the typed condition set.
///
/// `Ok(())` for `0x00`; a named device-busy error for the sentinel block;
/// [`DeviceError::UnexpectedReturnCode`] for everything else.
pub fn classify_status(status: u8) -> DeviceResult<()> {
    match status {
        STATUS_OK => Ok(()),
        STATUS_CAMERA_OFF => Err(DeviceError::CameraIsOff),
        STATUS_AUTOGUIDING_ACTIVE => Err(DeviceError::AutoGuidingActive),
        STATUS_COMMAND_IN_PROGRESS => Err(DeviceError::AnotherCommandInProgress),
        STATUS_UI_LOCKED => Err(DeviceError::UiLocked),
        STATUS_CANNOT_DO_FUNCTIONS => Err(DeviceError::CannotDoFunctions),
        other => Err(DeviceError::UnexpectedReturnCode(other)),
    }
}

// =============================================================================
// Little-endian field helpers
// =============================================================================

pub(crate) fn put_u16_le(out: &mut Vec<u8>, value: u16) {
    out.push((value & 0x00FF) as u8);
    out.push((value >> 8) as u8);
}

/// Reconstruct `low + high * 256`.
pub(crate) fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    bytes[offset] as u16 + bytes[offset + 1] as u16 * 256
}

pub(crate) fn read_i16_le(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Reconstruct `low + mid * 256 + high * 65536`.
pub(crate) fn read_u24_le(bytes: &[u8], offset: usize) -> u32 {
    bytes[offset] as u32 + bytes[offset + 1] as u32 * 256 + bytes[offset + 2] as u32 * 65536
}

fn check_range(name: &'static str, value: i64, min: i64, max: i64) -> DeviceResult<()> {
    if value < min || value > max {
        return Err(DeviceError::ParameterRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_len(bytes: &[u8], expected: usize) -> DeviceResult<()> {
    if bytes.len() != expected {
        return Err(DeviceError::ShortResponse {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Command trait and wire exchange
// =============================================================================

/// An immutable device command.
///
/// A command declares its opcode, encodes its parameters, states how many
/// response bytes follow a successful status, and decodes those bytes into
/// its typed response. Parameter validation happens at construction (the
/// `new` functions below), never here.
pub trait MgenCommand: Send + Sync {
    /// Typed decode target.
    type Response: Send;

    /// Sub-command opcode written as the first byte.
    fn opcode(&self) -> u8;

    /// Whether the device answers with a status byte before the payload.
    ///
    /// True for every application-dialect command; the boot handshake is
    /// the only exception.
    fn expects_status(&self) -> bool {
        true
    }

    /// Append encoded parameters (little-endian) after a `0x00` status.
    fn write_params(&self, _out: &mut Vec<u8>) {}

    /// Exact number of response bytes following the parameters.
    fn response_len(&self) -> usize;

    /// Nominal timeout for this command's exchange.
    fn timeout(&self) -> Duration {
        DEFAULT_COMMAND_TIMEOUT
    }

    /// Decode the raw response bytes.
    fn decode(&self, bytes: &[u8]) -> DeviceResult<Self::Response>;
}

/// Run one framed exchange on the transport.
///
/// Opcode, status, parameters, response - in that order. Classification
/// errors propagate untouched; this function performs no retries (that is
/// the executor's job) and must be called with the transport lock held.
pub(crate) async fn exchange<C: MgenCommand>(
    transport: &mut dyn Transport,
    cmd: &C,
) -> DeviceResult<C::Response> {
    transport.set_timeouts(cmd.timeout(), cmd.timeout()).await?;
    transport.write_all(&[cmd.opcode()]).await?;

    let mut status = [0u8; 1];
    transport.read_exact(&mut status).await?;

    if !cmd.expects_status() {
        tracing::trace!(opcode = cmd.opcode(), reply = status[0], "raw exchange");
        return cmd.decode(&status);
    }

    classify_status(status[0])?;

    let mut params = Vec::new();
    cmd.write_params(&mut params);
    if !params.is_empty() {
        transport.write_all(&params).await?;
    }

    let mut response = vec![0u8; cmd.response_len()];
    if !response.is_empty() {
        transport.read_exact(&mut response).await?;
    }
    tracing::trace!(
        opcode = cmd.opcode(),
        params = params.len(),
        response = response.len(),
        "exchange complete"
    );
    cmd.decode(&response)
}

// =============================================================================
// Probe commands
// =============================================================================

/// Application-dialect no-op: opcode `0x00`, acknowledged by status alone.
pub struct ProbeApp;

impl MgenCommand for ProbeApp {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_NOOP
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

/// Boot-dialect handshake: `0xAA` answered by the complement byte `0x55`
/// with no status framing.
pub struct ProbeBoot;

impl MgenCommand for ProbeBoot {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_BOOT_PING
    }

    fn expects_status(&self) -> bool {
        false
    }

    fn response_len(&self) -> usize {
        1
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 1)?;
        if bytes[0] == BOOT_PING_REPLY {
            Ok(())
        } else {
            Err(DeviceError::UnexpectedReturnCode(bytes[0]))
        }
    }
}

// =============================================================================
// Identity commands
// =============================================================================

/// Read the firmware version word.
pub struct FirmwareVersion;

impl MgenCommand for FirmwareVersion {
    type Response = u16;

    fn opcode(&self) -> u8 {
        OP_FIRMWARE_VERSION
    }

    fn response_len(&self) -> usize {
        2
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<u16> {
        check_len(bytes, 2)?;
        Ok(read_u16_le(bytes, 0))
    }
}

/// Read the device uptime counter, seconds, 24-bit.
pub struct Uptime;

impl MgenCommand for Uptime {
    type Response = u32;

    fn opcode(&self) -> u8 {
        OP_UPTIME
    }

    fn response_len(&self) -> usize {
        3
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<u32> {
        check_len(bytes, 3)?;
        Ok(read_u24_le(bytes, 0))
    }
}

// =============================================================================
// Imaging parameters
// =============================================================================

/// Upload camera gain, exposure time and detection threshold.
///
/// All three fields have hardware-defined legal ranges, checked in
/// [`SetImagingParams::new`].
pub struct SetImagingParams {
    gain: u8,
    exposure_ms: u16,
    threshold: u8,
}

impl SetImagingParams {
    pub const GAIN_MIN: i64 = 2;
    pub const GAIN_MAX: i64 = 9;
    pub const EXPOSURE_MIN_MS: i64 = 50;
    pub const EXPOSURE_MAX_MS: i64 = 4000;
    pub const THRESHOLD_MIN: i64 = 1;
    pub const THRESHOLD_MAX: i64 = 99;

    /// Validate and construct. Out-of-range values are rejected, never
    /// clamped.
    pub fn new(gain: u8, exposure_ms: u16, threshold: u8) -> DeviceResult<Self> {
        check_range("gain", gain as i64, Self::GAIN_MIN, Self::GAIN_MAX)?;
        check_range(
            "exposure_ms",
            exposure_ms as i64,
            Self::EXPOSURE_MIN_MS,
            Self::EXPOSURE_MAX_MS,
        )?;
        check_range(
            "threshold",
            threshold as i64,
            Self::THRESHOLD_MIN,
            Self::THRESHOLD_MAX,
        )?;
        Ok(Self {
            gain,
            exposure_ms,
            threshold,
        })
    }
}

impl MgenCommand for SetImagingParams {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_SET_IMAGING_PARAMS
    }

    fn write_params(&self, out: &mut Vec<u8>) {
        out.push(self.gain);
        put_u16_le(out, self.exposure_ms);
        out.push(self.threshold);
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

// =============================================================================
// Star commands
// =============================================================================

/// Star record returned by [`GetStarData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarData {
    pub position_x: u16,
    pub position_y: u16,
    pub brightness: u16,
    pub pixel_count: u8,
    pub peak: u8,
}

/// Run a star search with the given detection threshold.
pub struct SearchStar {
    threshold: u8,
}

impl SearchStar {
    /// Validate and construct; threshold must be within 1..=99.
    pub fn new(threshold: u8) -> DeviceResult<Self> {
        check_range(
            "threshold",
            threshold as i64,
            SetImagingParams::THRESHOLD_MIN,
            SetImagingParams::THRESHOLD_MAX,
        )?;
        Ok(Self { threshold })
    }
}

impl MgenCommand for SearchStar {
    /// Number of stars found.
    type Response = u8;

    fn opcode(&self) -> u8 {
        OP_SEARCH_STAR
    }

    fn write_params(&self, out: &mut Vec<u8>) {
        out.push(self.threshold);
    }

    fn response_len(&self) -> usize {
        1
    }

    fn timeout(&self) -> Duration {
        // A full-frame star search takes noticeably longer than a register
        // read.
        Duration::from_millis(5000)
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<u8> {
        check_len(bytes, 1)?;
        Ok(bytes[0])
    }
}

/// Fetch the 8-byte star record at `index`.
pub struct GetStarData {
    index: u8,
}

impl GetStarData {
    pub fn new(index: u8) -> Self {
        Self { index }
    }
}

impl MgenCommand for GetStarData {
    type Response = StarData;

    fn opcode(&self) -> u8 {
        OP_GET_STAR_DATA
    }

    fn write_params(&self, out: &mut Vec<u8>) {
        out.push(self.index);
    }

    fn response_len(&self) -> usize {
        8
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<StarData> {
        check_len(bytes, 8)?;
        Ok(StarData {
            position_x: read_u16_le(bytes, 0),
            position_y: read_u16_le(bytes, 2),
            brightness: read_u16_le(bytes, 4),
            pixel_count: bytes[6],
            peak: bytes[7],
        })
    }
}

// =============================================================================
// Calibration commands
// =============================================================================

/// Why a calibration run ended in the error stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFailure {
    UserCanceled,
    StarLost,
    FatalPositionError,
    OrientationError,
}

impl CalibrationFailure {
    pub fn description(&self) -> &'static str {
        match self {
            Self::UserCanceled => "Calibration canceled by user",
            Self::StarLost => "Guide star lost during calibration",
            Self::FatalPositionError => "Fatal star position error",
            Self::OrientationError => "Camera orientation error",
        }
    }
}

/// Calibration progress stages, decoded from the state byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStage {
    NotStarted,
    MeasuringStartPosition,
    MovingDecEliminatingBacklash,
    MeasuringDec,
    MeasuringRa,
    AlmostDone,
    Done,
    Error(CalibrationFailure),
}

impl CalibrationStage {
    /// Whether the run has reached a terminal stage.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// Begin a calibration run.
pub struct StartCalibration;

impl MgenCommand for StartCalibration {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_START_CALIBRATION
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

/// Read the calibration state + error byte pair.
pub struct QueryCalibration;

impl MgenCommand for QueryCalibration {
    type Response = CalibrationStage;

    fn opcode(&self) -> u8 {
        OP_QUERY_CALIBRATION
    }

    fn response_len(&self) -> usize {
        2
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<CalibrationStage> {
        check_len(bytes, 2)?;
        let stage = match bytes[0] {
            0x00 => CalibrationStage::NotStarted,
            0x01 => CalibrationStage::MeasuringStartPosition,
            0x02 => CalibrationStage::MovingDecEliminatingBacklash,
            0x03 => CalibrationStage::MeasuringDec,
            0x04 => CalibrationStage::MeasuringRa,
            0x05 => CalibrationStage::AlmostDone,
            0x06 => CalibrationStage::Done,
            0xFF => {
                let failure = match bytes[1] {
                    0x01 => CalibrationFailure::UserCanceled,
                    0x02 => CalibrationFailure::StarLost,
                    0x03 => CalibrationFailure::FatalPositionError,
                    0x04 => CalibrationFailure::OrientationError,
                    other => return Err(DeviceError::UnexpectedReturnCode(other)),
                };
                CalibrationStage::Error(failure)
            }
            other => return Err(DeviceError::UnexpectedReturnCode(other)),
        };
        Ok(stage)
    }
}

/// Abort a calibration run.
pub struct CancelCalibration;

impl MgenCommand for CancelCalibration {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_CANCEL_CALIBRATION
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

// =============================================================================
// Guiding commands
// =============================================================================

/// Guiding status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideState {
    pub guiding_active: bool,
    pub star_present: bool,
    /// Signed drift in 1/256 pixel units, two's-complement.
    pub drift_x: i16,
    pub drift_y: i16,
}

pub struct StartGuiding;

impl MgenCommand for StartGuiding {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_START_GUIDING
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

pub struct StopGuiding;

impl MgenCommand for StopGuiding {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_STOP_GUIDING
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

pub struct QueryGuideState;

impl MgenCommand for QueryGuideState {
    type Response = GuideState;

    fn opcode(&self) -> u8 {
        OP_QUERY_GUIDE_STATE
    }

    fn response_len(&self) -> usize {
        5
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<GuideState> {
        check_len(bytes, 5)?;
        Ok(GuideState {
            guiding_active: bytes[0] & 0x01 != 0,
            star_present: bytes[0] & 0x02 != 0,
            drift_x: read_i16_le(bytes, 1),
            drift_y: read_i16_le(bytes, 3),
        })
    }
}

// =============================================================================
// Dither commands
// =============================================================================

/// Dithering progress flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DitherState {
    pub in_progress: bool,
}

pub struct StartDither;

impl MgenCommand for StartDither {
    type Response = ();

    fn opcode(&self) -> u8 {
        OP_START_DITHER
    }

    fn response_len(&self) -> usize {
        0
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<()> {
        check_len(bytes, 0)
    }
}

pub struct QueryDitherState;

impl MgenCommand for QueryDitherState {
    type Response = DitherState;

    fn opcode(&self) -> u8 {
        OP_QUERY_DITHER_STATE
    }

    fn response_len(&self) -> usize {
        1
    }

    fn decode(&self, bytes: &[u8]) -> DeviceResult<DitherState> {
        check_len(bytes, 1)?;
        Ok(DitherState {
            in_progress: bytes[0] & 0x01 != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_covers_sentinel_set() {
        assert!(classify_status(STATUS_OK).is_ok());
        assert!(matches!(
            classify_status(STATUS_CAMERA_OFF),
            Err(DeviceError::CameraIsOff)
        ));
        assert!(matches!(
            classify_status(STATUS_AUTOGUIDING_ACTIVE),
            Err(DeviceError::AutoGuidingActive)
        ));
        assert!(matches!(
            classify_status(STATUS_COMMAND_IN_PROGRESS),
            Err(DeviceError::AnotherCommandInProgress)
        ));
        assert!(matches!(
            classify_status(STATUS_UI_LOCKED),
            Err(DeviceError::UiLocked)
        ));
        assert!(matches!(
            classify_status(STATUS_CANNOT_DO_FUNCTIONS),
            Err(DeviceError::CannotDoFunctions)
        ));
    }

    #[test]
    fn unknown_status_is_unexpected_return_code() {
        assert!(matches!(
            classify_status(0x7E),
            Err(DeviceError::UnexpectedReturnCode(0x7E))
        ));
        assert!(matches!(
            classify_status(0x01),
            Err(DeviceError::UnexpectedReturnCode(0x01))
        ));
    }

    #[test]
    fn u16_le_round_trip() {
        for value in [0u16, 1, 32767, 65535] {
            let mut buf = Vec::new();
            put_u16_le(&mut buf, value);
            assert_eq!(buf.len(), 2);
            assert_eq!(read_u16_le(&buf, 0), value);
        }
    }

    #[test]
    fn u16_le_is_least_significant_first() {
        let mut buf = Vec::new();
        put_u16_le(&mut buf, 0x0203);
        assert_eq!(buf, vec![0x03, 0x02]);
        assert_eq!(read_u16_le(&[0x03, 0x02], 0), 0x03 + 0x02 * 256);
    }

    #[test]
    fn i16_le_uses_twos_complement() {
        assert_eq!(read_i16_le(&[0xFF, 0xFF], 0), -1);
        assert_eq!(read_i16_le(&[0x00, 0x80], 0), i16::MIN);
        assert_eq!(read_i16_le(&[0x2A, 0x00], 0), 42);
    }

    #[test]
    fn u24_le_reconstruction() {
        assert_eq!(read_u24_le(&[0x01, 0x02, 0x03], 0), 0x030201);
        assert_eq!(read_u24_le(&[0xFF, 0xFF, 0xFF], 0), 0xFFFFFF);
    }

    #[test]
    fn imaging_params_accept_full_legal_ranges() {
        for gain in 2..=9u8 {
            assert!(SetImagingParams::new(gain, 50, 1).is_ok());
        }
        assert!(SetImagingParams::new(2, 50, 1).is_ok());
        assert!(SetImagingParams::new(9, 4000, 99).is_ok());
    }

    #[test]
    fn imaging_params_reject_each_field_independently() {
        assert!(matches!(
            SetImagingParams::new(1, 100, 50),
            Err(DeviceError::ParameterRange { name: "gain", .. })
        ));
        assert!(matches!(
            SetImagingParams::new(10, 100, 50),
            Err(DeviceError::ParameterRange { name: "gain", .. })
        ));
        assert!(matches!(
            SetImagingParams::new(5, 49, 50),
            Err(DeviceError::ParameterRange {
                name: "exposure_ms",
                ..
            })
        ));
        assert!(matches!(
            SetImagingParams::new(5, 4001, 50),
            Err(DeviceError::ParameterRange {
                name: "exposure_ms",
                ..
            })
        ));
        assert!(matches!(
            SetImagingParams::new(5, 100, 0),
            Err(DeviceError::ParameterRange {
                name: "threshold",
                ..
            })
        ));
        assert!(matches!(
            SetImagingParams::new(5, 100, 100),
            Err(DeviceError::ParameterRange {
                name: "threshold",
                ..
            })
        ));
    }

    #[test]
    fn imaging_params_encode_little_endian() {
        let cmd = SetImagingParams::new(5, 1000, 60).unwrap();
        let mut out = Vec::new();
        cmd.write_params(&mut out);
        // 1000 = 0x03E8, least-significant byte first
        assert_eq!(out, vec![5, 0xE8, 0x03, 60]);
    }

    #[test]
    fn star_data_decodes_documented_layout() {
        let bytes = [0x34, 0x12, 0x78, 0x56, 0xE8, 0x03, 17, 200];
        let star = GetStarData::new(0).decode(&bytes).unwrap();
        assert_eq!(star.position_x, 0x1234);
        assert_eq!(star.position_y, 0x5678);
        assert_eq!(star.brightness, 1000);
        assert_eq!(star.pixel_count, 17);
        assert_eq!(star.peak, 200);
    }

    #[test]
    fn star_data_rejects_short_response() {
        assert!(matches!(
            GetStarData::new(0).decode(&[0u8; 7]),
            Err(DeviceError::ShortResponse {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn search_star_threshold_is_validated() {
        assert!(SearchStar::new(1).is_ok());
        assert!(SearchStar::new(99).is_ok());
        assert!(SearchStar::new(0).is_err());
        assert!(SearchStar::new(100).is_err());
    }

    #[test]
    fn calibration_stage_decoding() {
        let q = QueryCalibration;
        assert_eq!(
            q.decode(&[0x00, 0x00]).unwrap(),
            CalibrationStage::NotStarted
        );
        assert_eq!(
            q.decode(&[0x02, 0x00]).unwrap(),
            CalibrationStage::MovingDecEliminatingBacklash
        );
        assert_eq!(q.decode(&[0x04, 0x00]).unwrap(), CalibrationStage::MeasuringRa);
        assert_eq!(q.decode(&[0x06, 0x00]).unwrap(), CalibrationStage::Done);
        assert!(q.decode(&[0x06, 0x00]).unwrap().is_finished());
        assert!(!q.decode(&[0x05, 0x00]).unwrap().is_finished());
    }

    #[test]
    fn calibration_error_reasons_are_closed_set() {
        let q = QueryCalibration;
        assert_eq!(
            q.decode(&[0xFF, 0x01]).unwrap(),
            CalibrationStage::Error(CalibrationFailure::UserCanceled)
        );
        assert_eq!(
            q.decode(&[0xFF, 0x02]).unwrap(),
            CalibrationStage::Error(CalibrationFailure::StarLost)
        );
        assert_eq!(
            q.decode(&[0xFF, 0x03]).unwrap(),
            CalibrationStage::Error(CalibrationFailure::FatalPositionError)
        );
        assert_eq!(
            q.decode(&[0xFF, 0x04]).unwrap(),
            CalibrationStage::Error(CalibrationFailure::OrientationError)
        );
        assert!(q.decode(&[0xFF, 0x09]).is_err());
        assert!(q.decode(&[0x42, 0x00]).is_err());
    }

    #[test]
    fn guide_state_flags_and_drift() {
        let q = QueryGuideState;
        let state = q.decode(&[0x03, 0xFE, 0xFF, 0x10, 0x00]).unwrap();
        assert!(state.guiding_active);
        assert!(state.star_present);
        assert_eq!(state.drift_x, -2);
        assert_eq!(state.drift_y, 16);

        let idle = q.decode(&[0x00, 0, 0, 0, 0]).unwrap();
        assert!(!idle.guiding_active);
        assert!(!idle.star_present);
    }

    #[test]
    fn boot_ping_accepts_only_complement_reply() {
        assert!(ProbeBoot.decode(&[BOOT_PING_REPLY]).is_ok());
        assert!(matches!(
            ProbeBoot.decode(&[0x00]),
            Err(DeviceError::UnexpectedReturnCode(0x00))
        ));
    }
}
