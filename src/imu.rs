use crate::error::ProtocolError;
use crate::protocol::{self, ImuReport, PsvrSensorMessage, RangeModes};
use crate::types::{ImuSample, ImuState, RawImuSample};

/// Per-axis factory calibration read from the device configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuCalibration {
    pub acc_bias: [f64; 3],
    pub acc_scale: [f64; 3],
    pub gyro_bias: [f64; 3],
    pub gyro_scale: [f64; 3],
}

impl Default for ImuCalibration {
    fn default() -> Self {
        Self {
            acc_bias: [0.0; 3],
            acc_scale: [1.0; 3],
            gyro_bias: [0.0; 3],
            gyro_scale: [1.0; 3],
        }
    }
}

/// How a report's sequence number relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    First,
    InOrder,
    /// Same number as the last report; the report is a repeat.
    Duplicate,
    /// This many reports were lost in between.
    Gap(u8),
}

/// Compare sequence numbers modulo 256.
pub fn check_sequence(last: Option<u8>, sequence: u8) -> SequenceCheck {
    let Some(last) = last else {
        return SequenceCheck::First;
    };
    match sequence.wrapping_sub(last) {
        0 => SequenceCheck::Duplicate,
        1 => SequenceCheck::InOrder,
        delta => SequenceCheck::Gap(delta - 1),
    }
}

fn calibrate(raw: [i16; 3], bias: [f64; 3], scale: [f64; 3], range: f64) -> [f64; 3] {
    let mut out = [0.0; 3];
    for axis in 0..3 {
        out[axis] = (f64::from(raw[axis]) - bias[axis]) * scale[axis] * range;
    }
    out
}

/// Result of feeding one IMU report to the decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImuDecode {
    Samples {
        sequence: u8,
        samples: [ImuSample; 2],
    },
    /// Range modes have not been queried yet; the report was not decoded.
    AwaitingRange,
    /// Repeat of the previous report, dropped.
    Duplicate,
}

/// Turns raw IMU reports into calibrated samples and keeps the running state.
#[derive(Debug, Default)]
pub struct ImuDecoder {
    calibration: ImuCalibration,
    range: Option<RangeModes>,
    state: ImuState,
    last_sequence: Option<u8>,
    lost_reports: u64,
}

impl ImuDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_calibration(&mut self, calibration: ImuCalibration) {
        self.calibration = calibration;
    }

    pub fn calibration(&self) -> &ImuCalibration {
        &self.calibration
    }

    /// True until the device's full-scale range is known.
    pub fn needs_range_modes(&self) -> bool {
        self.range.is_none()
    }

    pub fn set_range_modes(&mut self, range: RangeModes) {
        self.range = Some(range);
    }

    pub fn state(&self) -> &ImuState {
        &self.state
    }

    pub fn lost_reports(&self) -> u64 {
        self.lost_reports
    }

    /// Extend the wrapping 32-bit device clock into monotonic time.
    fn advance_time(&mut self, timestamp: u32) -> u64 {
        let delta = timestamp.wrapping_sub(self.state.time as u32);
        self.state.time += u64::from(delta);
        self.state.time
    }

    fn convert(&mut self, raw: &RawImuSample, range: RangeModes) -> ImuSample {
        let c = &self.calibration;
        let angular_velocity = calibrate(raw.gyro, c.gyro_bias, c.gyro_scale, range.gyro_range);
        let acceleration = calibrate(raw.accel, c.acc_bias, c.acc_scale, range.accel_range);
        ImuSample {
            time: self.advance_time(raw.timestamp),
            angular_velocity,
            acceleration,
        }
    }

    /// Decode one 52-byte Vive IMU report.
    pub fn decode(&mut self, data: &[u8]) -> Result<ImuDecode, ProtocolError> {
        Ok(self.decode_report(protocol::parse_imu_report(data)?))
    }

    /// Decode the IMU part of a PSVR sensor message.
    pub fn decode_psvr(&mut self, message: &PsvrSensorMessage) -> ImuDecode {
        self.decode_report(message.imu_report())
    }

    /// Sequence check, calibration, and time extension for a parsed report.
    pub fn decode_report(&mut self, report: ImuReport) -> ImuDecode {
        let Some(range) = self.range else {
            return ImuDecode::AwaitingRange;
        };

        match check_sequence(self.last_sequence, report.sequence) {
            SequenceCheck::Duplicate => return ImuDecode::Duplicate,
            SequenceCheck::Gap(lost) => {
                log::debug!(
                    "IMU sequence jumped {} -> {} ({} reports lost)",
                    self.state.sequence,
                    report.sequence,
                    lost
                );
                self.lost_reports += u64::from(lost);
            }
            SequenceCheck::First | SequenceCheck::InOrder => {}
        }
        self.last_sequence = Some(report.sequence);
        self.state.sequence = report.sequence;

        let samples = [
            self.convert(&report.samples[0], range),
            self.convert(&report.samples[1], range),
        ];
        self.state.last_sample = Some(samples[1]);

        ImuDecode::Samples {
            sequence: report.sequence,
            samples,
        }
    }
}
