use crate::error::ProtocolError;
use crate::types::{CameraIntrinsics, RawImuSample};

// -- USB identifiers --
pub const VID_VALVE: u16 = 0x28DE;
pub const PID_VIVE_HEADSET: u16 = 0x2000;
pub const VID_OCULUS: u16 = 0x2833;
pub const PID_CAMERA_DK2: u16 = 0x0201;

/// HID interface carrying IMU reports.
pub const VIVE_IMU_INTERFACE: i32 = 0;
/// HID interface carrying lighthouse pulse reports.
pub const VIVE_LIGHTHOUSE_INTERFACE: i32 = 1;

// -- Streamed input reports --
pub const IMU_REPORT_ID: u8 = 0x20;
pub const IMU_REPORT_SIZE: usize = 52;
pub const IMU_SAMPLES_PER_REPORT: usize = 2;
const IMU_SAMPLE_SIZE: usize = 16;

pub const PULSE_REPORT_ID: u8 = 0x21;
pub const PULSE_REPORT_SIZE: usize = 64;
pub const PULSE_SLOTS: usize = 9;
const PULSE_SLOT_SIZE: usize = 7;

pub const SENSOR_ID_UNUSED: u8 = 0xFF;
pub const SENSOR_ID_VSYNC: u8 = 0xFE;
pub const MAX_SENSOR_ID: u8 = 31;

// -- Feature reports --
pub const RANGE_MODES_REPORT_ID: u8 = 0x01;
pub const RANGE_MODES_REPORT_SIZE: usize = 64;
pub const MAX_RANGE_MODE: u8 = 4;

pub const FIRMWARE_VERSION_REPORT_ID: u8 = 0x05;
pub const FIRMWARE_VERSION_REPORT_SIZE: usize = 64;

pub const CONFIG_START_REPORT_ID: u8 = 0x10;
pub const CONFIG_READ_REPORT_ID: u8 = 0x11;
pub const CONFIG_REPORT_SIZE: usize = 64;
const CONFIG_CHUNK_MAX: usize = CONFIG_REPORT_SIZE - 2;

pub const LIGHTHOUSE_ENABLE_REPORT_ID: u8 = 0x04;
pub const LIGHTHOUSE_RESET_REPORT_ID: u8 = 0x07;
pub const LIGHTHOUSE_REPORT_SIZE: usize = 5;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

// -- DK2 camera EEPROM --
pub const EEPROM_VERSION_ADDR: u16 = 0x0FF0;
pub const EEPROM_VERSION_LEN: usize = 0x10;
pub const EEPROM_SERIAL_ADDR: u16 = 0x2800;
pub const EEPROM_SERIAL_LEN: usize = 0x20;
pub const EEPROM_CALIBRATION_ADDR: u16 = 0x2000;
pub const EEPROM_BLOCK_SIZE: usize = 32;
pub const EEPROM_CALIBRATION_SIZE: usize = 128;

/// Byte offsets of the little-endian doubles in the calibration record.
pub mod intrinsics_offset {
    pub const FX: usize = 18;
    pub const FY: usize = 30;
    pub const CX: usize = 42;
    pub const CY: usize = 54;
    pub const K1: usize = 66;
    pub const K2: usize = 78;
    pub const P1: usize = 90;
    pub const P2: usize = 102;
    pub const K3: usize = 114;
}

/// Check that `data` is exactly one `expected_len`-byte report with id `expected_id`.
pub fn check_report(data: &[u8], expected_id: u8, expected_len: usize) -> Result<(), ProtocolError> {
    let id = data.first().copied().unwrap_or(0);
    if data.len() != expected_len {
        return Err(ProtocolError::WrongLength {
            id,
            len: data.len(),
            expected: expected_len,
        });
    }
    if id != expected_id {
        return Err(ProtocolError::UnknownReportId {
            got: id,
            expected: expected_id,
        });
    }
    Ok(())
}

fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn le_i16(data: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([data[at], data[at + 1]])
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Read a little-endian f64 at `offset`, or `None` if it would run past the buffer.
pub fn read_f64_le(data: &[u8], offset: usize) -> Option<f64> {
    let bytes: [u8; 8] = data.get(offset..offset.checked_add(8)?)?.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

/// One slot of a lighthouse pulse report, before sensor id validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSlot {
    pub id: u8,
    pub duration: u16,
    pub timestamp: u32,
}

/// Parse a 64-byte lighthouse pulse report into its 9 raw slots.
///
/// Report layout:
/// - `[0]`: 0x21 report id
/// - `[1..64]`: 9 slots of `{id: u8, duration: u16 LE, timestamp: u32 LE}`
pub fn parse_pulse_report(data: &[u8]) -> Result<[PulseSlot; PULSE_SLOTS], ProtocolError> {
    check_report(data, PULSE_REPORT_ID, PULSE_REPORT_SIZE)?;

    let mut slots = [PulseSlot {
        id: SENSOR_ID_UNUSED,
        duration: 0,
        timestamp: 0,
    }; PULSE_SLOTS];
    for (i, slot) in slots.iter_mut().enumerate() {
        let at = 1 + i * PULSE_SLOT_SIZE;
        *slot = PulseSlot {
            id: data[at],
            duration: le_u16(data, at + 1),
            timestamp: le_u32(data, at + 3),
        };
    }
    Ok(slots)
}

/// Encode pulse slots into a report. Used by tests and replay tooling.
pub fn build_pulse_report(slots: &[PulseSlot; PULSE_SLOTS]) -> [u8; PULSE_REPORT_SIZE] {
    let mut buf = [0u8; PULSE_REPORT_SIZE];
    buf[0] = PULSE_REPORT_ID;
    for (i, slot) in slots.iter().enumerate() {
        let at = 1 + i * PULSE_SLOT_SIZE;
        buf[at] = slot.id;
        buf[at + 1..at + 3].copy_from_slice(&slot.duration.to_le_bytes());
        buf[at + 3..at + 7].copy_from_slice(&slot.timestamp.to_le_bytes());
    }
    buf
}

/// A decoded IMU report: one sequence number and two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuReport {
    pub sequence: u8,
    pub samples: [RawImuSample; IMU_SAMPLES_PER_REPORT],
}

/// Parse a 52-byte IMU report.
///
/// Report layout:
/// - `[0]`: 0x20 report id
/// - `[1]`: sequence number, wraps at 256
/// - `[2..18]`, `[18..34]`: samples of `{timestamp: u32, gyro: [i16; 3], accel: [i16; 3]}` LE
/// - `[34..52]`: reserved
pub fn parse_imu_report(data: &[u8]) -> Result<ImuReport, ProtocolError> {
    check_report(data, IMU_REPORT_ID, IMU_REPORT_SIZE)?;

    Ok(ImuReport {
        sequence: data[1],
        samples: read_imu_samples(data, 2),
    })
}

/// Two consecutive 16-byte samples starting at `at`. Shared by the Vive
/// report and the PSVR sensor message.
fn read_imu_samples(data: &[u8], at: usize) -> [RawImuSample; IMU_SAMPLES_PER_REPORT] {
    let mut samples = [RawImuSample::default(); IMU_SAMPLES_PER_REPORT];
    for (i, sample) in samples.iter_mut().enumerate() {
        let at = at + i * IMU_SAMPLE_SIZE;
        *sample = RawImuSample {
            timestamp: le_u32(data, at),
            gyro: [le_i16(data, at + 4), le_i16(data, at + 6), le_i16(data, at + 8)],
            accel: [le_i16(data, at + 10), le_i16(data, at + 12), le_i16(data, at + 14)],
        };
    }
    samples
}

fn write_imu_samples(buf: &mut [u8], at: usize, samples: &[RawImuSample; IMU_SAMPLES_PER_REPORT]) {
    for (i, sample) in samples.iter().enumerate() {
        let at = at + i * IMU_SAMPLE_SIZE;
        buf[at..at + 4].copy_from_slice(&sample.timestamp.to_le_bytes());
        for axis in 0..3 {
            let g = at + 4 + axis * 2;
            buf[g..g + 2].copy_from_slice(&sample.gyro[axis].to_le_bytes());
            let a = at + 10 + axis * 2;
            buf[a..a + 2].copy_from_slice(&sample.accel[axis].to_le_bytes());
        }
    }
}

/// Encode an IMU report. Used by tests and replay tooling.
pub fn build_imu_report(report: &ImuReport) -> [u8; IMU_REPORT_SIZE] {
    let mut buf = [0u8; IMU_REPORT_SIZE];
    buf[0] = IMU_REPORT_ID;
    buf[1] = report.sequence;
    write_imu_samples(&mut buf, 2, &report.samples);
    buf
}

/// Full-scale range of the IMU, as physical units per LSB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeModes {
    /// rad/s per LSB.
    pub gyro_range: f64,
    /// m/s² per LSB.
    pub accel_range: f64,
}

/// Parse the range modes feature report.
///
/// Byte 1 selects the gyro range (250 << n deg/s full scale), byte 2 the
/// accelerometer range (2 << n g full scale).
pub fn parse_range_modes(data: &[u8]) -> Result<RangeModes, ProtocolError> {
    check_report(data, RANGE_MODES_REPORT_ID, RANGE_MODES_REPORT_SIZE)?;
    let (gyro, accel) = (data[1], data[2]);
    if gyro > MAX_RANGE_MODE || accel > MAX_RANGE_MODE {
        return Err(ProtocolError::InvalidRangeMode { gyro, accel });
    }
    Ok(RangeModes {
        gyro_range: std::f64::consts::PI / 180.0 * f64::from(250u32 << gyro) / 32768.0,
        accel_range: STANDARD_GRAVITY * f64::from(2u32 << accel) / 32768.0,
    })
}

/// Firmware identification returned by the headset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub revision: u32,
    pub builder: String,
    pub build_host: String,
    /// [major, minor, micro, revision]
    pub hardware: [u8; 4],
    /// [major, minor]
    pub fpga: [u8; 2],
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}@{} FPGA {}.{}",
            self.revision, self.builder, self.build_host, self.fpga[0], self.fpga[1]
        )
    }
}

/// Parse the 64-byte firmware version feature report.
///
/// Layout: `[0]` id, `[1..5]` revision, `[5..9]` unknown, `[9..25]` builder,
/// `[25..41]` build host, `[41..45]` hardware micro/minor/major/revision,
/// `[45..49]` unknown, `[49]` FPGA minor, `[50]` FPGA major.
pub fn parse_firmware_version(data: &[u8]) -> Result<FirmwareVersion, ProtocolError> {
    check_report(data, FIRMWARE_VERSION_REPORT_ID, FIRMWARE_VERSION_REPORT_SIZE)?;
    Ok(FirmwareVersion {
        revision: le_u32(data, 1),
        builder: extract_string(&data[9..25]),
        build_host: extract_string(&data[25..41]),
        hardware: [data[43], data[42], data[41], data[44]],
        fpga: [data[50], data[49]],
    })
}

/// Return the payload of one configuration readout chunk. Empty means done.
///
/// Layout: `[0]` 0x11, `[1]` payload length, `[2..2 + len]` payload.
pub fn parse_config_chunk(data: &[u8]) -> Result<&[u8], ProtocolError> {
    check_report(data, CONFIG_READ_REPORT_ID, CONFIG_REPORT_SIZE)?;
    let len = data[1] as usize;
    if len > CONFIG_CHUNK_MAX {
        return Err(ProtocolError::ChunkTooLong(len));
    }
    Ok(&data[2..2 + len])
}

/// Build the lighthouse receiver enable feature report.
///
/// Vsync timestamps are always enabled; byte 1 = 0 enables sensor reports.
pub fn build_lighthouse_enable(enable_sensors: bool) -> [u8; LIGHTHOUSE_REPORT_SIZE] {
    let mut buf = [0u8; LIGHTHOUSE_REPORT_SIZE];
    buf[0] = LIGHTHOUSE_ENABLE_REPORT_ID;
    buf[1] = if enable_sensors { 0x00 } else { 0x01 };
    buf
}

/// Build the receiver register reset report. Without it, inactive channels
/// are not cleared to 0xff.
pub fn build_lighthouse_reset() -> [u8; LIGHTHOUSE_REPORT_SIZE] {
    let mut buf = [0u8; LIGHTHOUSE_REPORT_SIZE];
    buf[0] = LIGHTHOUSE_RESET_REPORT_ID;
    buf[1] = 0x02;
    buf
}

/// Decode camera intrinsics from the 128-byte EEPROM calibration record.
pub fn parse_intrinsics(record: &[u8]) -> Result<CameraIntrinsics, ProtocolError> {
    use intrinsics_offset::*;

    if record.len() != EEPROM_CALIBRATION_SIZE {
        return Err(ProtocolError::WrongLength {
            id: 0,
            len: record.len(),
            expected: EEPROM_CALIBRATION_SIZE,
        });
    }
    let at = |offset: usize| read_f64_le(record, offset).unwrap_or(0.0);

    Ok(CameraIntrinsics::new(
        at(FX),
        at(FY),
        at(CX),
        at(CY),
        [at(K1), at(K2), at(P1), at(P2), at(K3)],
    ))
}

/// Extract a null-terminated string from a byte slice.
pub fn extract_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

// -- PlayStation VR headset --
//
// Control reports share a 4-byte header: id, one unknown byte, the magic
// 0xAA, and the payload length. Sensor messages carry no report id.

pub const PSVR_CONTROL_MAGIC: u8 = 0xAA;
const PSVR_HEADER_SIZE: usize = 4;

pub const PSVR_ENABLE_VR_TRACKING_REPORT_ID: u8 = 0x11;
pub const PSVR_ENABLE_VR_TRACKING_REPORT_SIZE: usize = 12;
const PSVR_ENABLE_VR_TRACKING_DATA: [u32; 2] = [0xFFFF_FF00, 0x0000_0000];

pub const PSVR_HEADSET_POWER_REPORT_ID: u8 = 0x17;
pub const PSVR_PROCESSING_BOX_POWER_REPORT_ID: u8 = 0x13;
pub const PSVR_SET_MODE_REPORT_ID: u8 = 0x23;
/// Size of the power and mode reports, which carry a single le32.
pub const PSVR_COMMAND_REPORT_SIZE: usize = 8;

pub const PSVR_DEVICE_INFO_REQUEST_ID: u8 = 0x81;
pub const PSVR_DEVICE_INFO_REQUEST_SIZE: usize = 12;

pub const PSVR_SERIAL_REPORT_ID: u8 = 0x80;
pub const PSVR_SERIAL_REPORT_SIZE: usize = 52;
pub const PSVR_CALIBRATION_REPORT_ID: u8 = 0x86;
pub const PSVR_CALIBRATION_REPORT_SIZE: usize = 64;
pub const PSVR_STATUS_REPORT_ID: u8 = 0xF0;
pub const PSVR_STATUS_REPORT_SIZE: usize = 20;
pub const PSVR_COMMAND_REPLY_ID: u8 = 0xA0;
pub const PSVR_COMMAND_REPLY_SIZE: usize = 64;
pub const PSVR_SENSOR_MESSAGE_SIZE: usize = 64;

bitflags::bitflags! {
    /// Flags byte of the PSVR status report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PsvrStatusFlags: u8 {
        const DISPLAY_ON = 0x01;
        const WORN = 0x02;
        const CINEMATIC_MODE = 0x04;
        const HEADPHONES_CONNECTED = 0x10;
        const MIC_MUTE = 0x20;
    }
}

bitflags::bitflags! {
    /// Buttons held, from the first byte of a sensor message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PsvrButtons: u8 {
        const VOLUME_UP = 0x02;
        const VOLUME_DOWN = 0x04;
        const MIC_MUTE = 0x08;
    }
}

/// Display mode selected with the set-mode report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsvrMode {
    Cinematic = 0,
    Vr = 1,
}

/// Power state reported in every sensor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsvrState {
    PowerButtonPressed = 1,
    PowerUp = 2,
    PowerOn = 3,
    Running = 4,
    PowerDown = 5,
    PowerOff = 6,
}

impl PsvrState {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::PowerButtonPressed,
            2 => Self::PowerUp,
            3 => Self::PowerOn,
            4 => Self::Running,
            5 => Self::PowerDown,
            6 => Self::PowerOff,
            _ => return None,
        })
    }
}

fn psvr_control_report<const N: usize>(id: u8) -> [u8; N] {
    let mut buf = [0u8; N];
    buf[0] = id;
    buf[2] = PSVR_CONTROL_MAGIC;
    buf[3] = (N - PSVR_HEADER_SIZE) as u8;
    buf
}

fn psvr_command(id: u8, value: u32) -> [u8; PSVR_COMMAND_REPORT_SIZE] {
    let mut buf: [u8; PSVR_COMMAND_REPORT_SIZE] = psvr_control_report(id);
    buf[4..8].copy_from_slice(&value.to_le_bytes());
    buf
}

pub fn build_psvr_enable_vr_tracking() -> [u8; PSVR_ENABLE_VR_TRACKING_REPORT_SIZE] {
    let mut buf: [u8; PSVR_ENABLE_VR_TRACKING_REPORT_SIZE] =
        psvr_control_report(PSVR_ENABLE_VR_TRACKING_REPORT_ID);
    buf[4..8].copy_from_slice(&PSVR_ENABLE_VR_TRACKING_DATA[0].to_le_bytes());
    buf[8..12].copy_from_slice(&PSVR_ENABLE_VR_TRACKING_DATA[1].to_le_bytes());
    buf
}

pub fn build_psvr_headset_power(on: bool) -> [u8; PSVR_COMMAND_REPORT_SIZE] {
    psvr_command(PSVR_HEADSET_POWER_REPORT_ID, u32::from(on))
}

/// The processing box inverts the power payload: 0 is on, 1 is off.
pub fn build_psvr_processing_box_power(on: bool) -> [u8; PSVR_COMMAND_REPORT_SIZE] {
    psvr_command(PSVR_PROCESSING_BOX_POWER_REPORT_ID, u32::from(!on))
}

pub fn build_psvr_set_mode(mode: PsvrMode) -> [u8; PSVR_COMMAND_REPORT_SIZE] {
    psvr_command(PSVR_SET_MODE_REPORT_ID, mode as u32)
}

pub fn build_psvr_device_info_request(request: u8, index: u8) -> [u8; PSVR_DEVICE_INFO_REQUEST_SIZE] {
    let mut buf: [u8; PSVR_DEVICE_INFO_REQUEST_SIZE] = psvr_control_report(PSVR_DEVICE_INFO_REQUEST_ID);
    buf[4] = request;
    buf[5] = index;
    buf
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsvrSerial {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub serial: String,
}

/// Parse the 52-byte serial report.
///
/// Report layout:
/// - `[0..4]`: 0x80, status, magic, payload length
/// - `[6]`, `[7]`: firmware minor, major
/// - `[16..32]`: NUL padded serial number
pub fn parse_psvr_serial(data: &[u8]) -> Result<PsvrSerial, ProtocolError> {
    check_report(data, PSVR_SERIAL_REPORT_ID, PSVR_SERIAL_REPORT_SIZE)?;
    Ok(PsvrSerial {
        firmware_major: data[7],
        firmware_minor: data[6],
        serial: extract_string(&data[16..32]),
    })
}

/// One chunk of the calibration blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsvrCalibrationChunk<'a> {
    pub index: u8,
    pub header: u16,
    pub payload: &'a [u8],
}

pub fn parse_psvr_calibration(data: &[u8]) -> Result<PsvrCalibrationChunk<'_>, ProtocolError> {
    check_report(data, PSVR_CALIBRATION_REPORT_ID, PSVR_CALIBRATION_REPORT_SIZE)?;
    Ok(PsvrCalibrationChunk {
        index: data[1],
        header: le_u16(data, 4),
        payload: &data[6..],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsvrStatus {
    pub flags: PsvrStatusFlags,
    pub volume: u8,
}

pub fn parse_psvr_status(data: &[u8]) -> Result<PsvrStatus, ProtocolError> {
    check_report(data, PSVR_STATUS_REPORT_ID, PSVR_STATUS_REPORT_SIZE)?;
    Ok(PsvrStatus {
        flags: PsvrStatusFlags::from_bits_retain(data[4]),
        volume: data[5],
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsvrCommandReply {
    pub command: u8,
    pub error: u8,
    pub message: String,
}

pub fn parse_psvr_command_reply(data: &[u8]) -> Result<PsvrCommandReply, ProtocolError> {
    check_report(data, PSVR_COMMAND_REPLY_ID, PSVR_COMMAND_REPLY_SIZE)?;
    Ok(PsvrCommandReply {
        command: data[4],
        error: data[5],
        message: extract_string(&data[6..]),
    })
}

/// A decoded PSVR sensor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsvrSensorMessage {
    pub buttons: PsvrButtons,
    pub volume: u16,
    /// Raw power state byte; see [`PsvrState::from_raw`].
    pub state: u8,
    pub samples: [RawImuSample; IMU_SAMPLES_PER_REPORT],
    /// Analog level of the button ladder, 1023 when nothing is pressed.
    pub button_raw: u16,
    pub proximity: u16,
    pub sequence: u8,
}

impl PsvrSensorMessage {
    /// The IMU part, in the form [`crate::imu::ImuDecoder`] consumes.
    pub fn imu_report(&self) -> ImuReport {
        ImuReport {
            sequence: self.sequence,
            samples: self.samples,
        }
    }
}

/// Parse a 64-byte sensor message.
///
/// Message layout:
/// - `[0]`: buttons, `[2..4]`: volume LE, `[5]`: power state
/// - `[16..32]`, `[32..48]`: IMU samples, same layout as the Vive report
/// - `[53..55]`: button ladder level BE, `[55..57]`: proximity LE
/// - `[63]`: sequence number
pub fn parse_psvr_sensor_message(data: &[u8]) -> Result<PsvrSensorMessage, ProtocolError> {
    if data.len() != PSVR_SENSOR_MESSAGE_SIZE {
        return Err(ProtocolError::WrongLength {
            id: 0,
            len: data.len(),
            expected: PSVR_SENSOR_MESSAGE_SIZE,
        });
    }
    Ok(PsvrSensorMessage {
        buttons: PsvrButtons::from_bits_retain(data[0]),
        volume: le_u16(data, 2),
        state: data[5],
        samples: read_imu_samples(data, 16),
        button_raw: u16::from_be_bytes([data[53], data[54]]),
        proximity: le_u16(data, 55),
        sequence: data[63],
    })
}

/// Encode a sensor message. Used by tests and replay tooling.
pub fn build_psvr_sensor_message(message: &PsvrSensorMessage) -> [u8; PSVR_SENSOR_MESSAGE_SIZE] {
    let mut buf = [0u8; PSVR_SENSOR_MESSAGE_SIZE];
    buf[0] = message.buttons.bits();
    buf[2..4].copy_from_slice(&message.volume.to_le_bytes());
    buf[5] = message.state;
    write_imu_samples(&mut buf, 16, &message.samples);
    buf[53..55].copy_from_slice(&message.button_raw.to_be_bytes());
    buf[55..57].copy_from_slice(&message.proximity.to_le_bytes());
    buf[63] = message.sequence;
    buf
}
