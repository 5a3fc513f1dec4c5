use std::io;

/// Why a device node could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The node vanished or never existed. Expected while enumerating.
    #[error("no such device: {0}")]
    NotFound(String),

    #[error("failed to open {path}: {source}")]
    Other {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A single report could not be decoded. The report is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid {len}-byte report 0x{id:02x}, expected {expected} bytes")]
    WrongLength { id: u8, len: usize, expected: usize },

    #[error("unexpected report id 0x{got:02x}, expected 0x{expected:02x}")]
    UnknownReportId { got: u8, expected: u8 },

    #[error("unhandled sensor id: 0x{0:02x}")]
    UnknownSensorId(u8),

    #[error("invalid range mode: gyro={gyro} accel={accel}")]
    InvalidRangeMode { gyro: u8, accel: u8 },

    #[error("config chunk length {0} exceeds report payload")]
    ChunkTooLong(usize),
}

/// Read/write/poll failures on an open device channel.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The device was unplugged or its node was revoked. Ends the poll loop.
    #[error("device disconnected")]
    Disconnected,

    /// Logged; the poll loop keeps running.
    #[error("transient I/O error: {0}")]
    Transient(#[source] io::Error),
}

/// Errors that can occur while driving a tracking device.
#[derive(Debug, thiserror::Error)]
pub enum TrackdError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("calibration incomplete: {0}")]
    CalibrationIncomplete(String),

    #[error("startup step '{step}' failed: {source}")]
    StartupStepFailed {
        step: &'static str,
        #[source]
        source: Box<TrackdError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("invalid device state: {0}")]
    InvalidState(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Channel disconnected")]
    ChannelDisconnected,
}

impl TrackdError {
    /// True if this is the "device is gone" case that enumeration expects.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackdError::Open(OpenError::NotFound(_)))
    }

    /// True if a poll loop seeing this error must mark its device inactive.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TrackdError::Io(IoError::Disconnected) | TrackdError::Usb(rusb::Error::NoDevice)
        )
    }

    /// Wraps an I/O failure from an open channel, classifying it by errno.
    pub fn from_channel_io(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::ENOENT) | Some(libc::ENXIO) | Some(libc::EPIPE) => {
                TrackdError::Io(IoError::Disconnected)
            }
            _ => TrackdError::Io(IoError::Transient(err)),
        }
    }

    /// Wraps an `open(2)` failure on `path`.
    pub fn from_open_io(path: &str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::ENOENT) | Some(libc::ENXIO) => {
                TrackdError::Open(OpenError::NotFound(path.to_string()))
            }
            _ => TrackdError::Open(OpenError::Other {
                path: path.to_string(),
                source: err,
            }),
        }
    }
}
