/// Class of tracking peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Camera,
    Hmd,
    Controller,
}

/// Identity of an opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Human readable name used as the log prefix.
    pub name: String,
    pub serial: Option<String>,
    /// Primary device node, e.g. `/dev/hidraw3` or `/dev/video1`.
    pub devnode: String,
    pub kind: DeviceKind,
}

/// One detected lighthouse sweep pulse on a photodiode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PulseEvent {
    /// Photodiode index, always in `0..=31`.
    pub sensor_id: u8,
    /// Pulse length in receiver ticks.
    pub duration: u16,
    /// Rising edge in receiver ticks.
    pub timestamp: u32,
}

/// One IMU sample as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawImuSample {
    pub timestamp: u32,
    pub gyro: [i16; 3],
    pub accel: [i16; 3],
}

/// An IMU sample in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Monotonic device time reconstructed from the wrapping 32-bit timestamp.
    pub time: u64,
    /// Angular velocity in rad/s.
    pub angular_velocity: [f64; 3],
    /// Linear acceleration in m/s².
    pub acceleration: [f64; 3],
}

/// Unit quaternion [w, x, y, z].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

/// Running IMU state carried between reports.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuState {
    /// Sequence number of the last accepted report. Wraps at 256.
    pub sequence: u8,
    /// Monotonic device time of the last accepted sample.
    pub time: u64,
    pub rotation: Quaternion,
    /// Last calibrated sample, if any.
    pub last_sample: Option<ImuSample>,
}

/// Pinhole camera intrinsics with Brown-Conrady distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Row-major `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub camera_matrix: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`.
    pub dist_coeffs: [f64; 5],
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, dist_coeffs: [f64; 5]) -> Self {
        Self {
            camera_matrix: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            dist_coeffs,
        }
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[1][2]
    }
}

/// A photodiode on the tracked object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LighthousePoint {
    /// Position in the object frame, meters.
    pub position: [f64; 3],
    /// Outward facing normal.
    pub normal: [f64; 3],
}

/// Photodiode constellation read from the device configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LighthouseModel {
    pub points: Vec<LighthousePoint>,
    /// Maps receiver channel to photodiode index.
    pub channel_map: Vec<u32>,
}

impl LighthouseModel {
    /// A model without points was not parsed and must not be used for tracking.
    pub fn is_valid(&self) -> bool {
        !self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsics_layout() {
        let k = CameraIntrinsics::new(700.0, 710.0, 376.0, 240.0, [0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(k.camera_matrix[2], [0.0, 0.0, 1.0]);
        assert_eq!(k.camera_matrix[0][1], 0.0);
        assert_eq!(k.fx(), 700.0);
        assert_eq!(k.fy(), 710.0);
        assert_eq!(k.cx(), 376.0);
        assert_eq!(k.cy(), 240.0);
    }

    #[test]
    fn test_imu_state_starts_at_identity() {
        let state = ImuState::default();
        assert_eq!(state.rotation, Quaternion::IDENTITY);
        assert_eq!(state.sequence, 0);
        assert_eq!(state.time, 0);
    }

    #[test]
    fn test_empty_model_is_invalid() {
        assert!(!LighthouseModel::default().is_valid());
    }
}
