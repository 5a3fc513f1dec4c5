//! # vrtrackd - device side of a VR positional tracking daemon
//!
//! Opens tracking hardware, decodes its raw reports and hands normalized
//! events to the fusion pipeline. Supported devices:
//! - HTC Vive headset (IMU and lighthouse receiver over hidraw)
//! - Oculus DK2 tracking camera (V4L2 frames, ESP570 bridge for calibration
//!   and sensor setup)
//!
//! Every device runs its own poll thread. All of them feed one bounded
//! [`EventStream`].
//!
//! ## Quick Start
//! ```no_run
//! use vrtrackd::{events, Registry, TrackdConfig};
//! use std::time::Duration;
//!
//! let config = TrackdConfig::from_env();
//! let (tx, stream) = events::channel(config.event_capacity);
//! let mut registry = Registry::new(config, tx);
//! registry.discover_vive().unwrap();
//! registry.start_all();
//!
//! for _ in 0..100 {
//!     let event = stream.recv_timeout(Duration::from_secs(1)).unwrap();
//!     println!("{}: {:?}", event.device(), event);
//! }
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod transport;
pub mod hid;
pub mod events;
pub mod lighthouse;
pub mod imu;
pub mod headset_config;
pub mod esp570;
pub mod eeprom;
pub mod mt9v034;
pub mod v4l2;
pub mod config;
pub mod device;
pub mod poll_loop;
pub mod debug;
pub mod vive;
pub mod camera;
pub mod registry;

pub use config::{DebugMode, TrackdConfig};
pub use device::{Device, DeviceState, Driver};
pub use error::TrackdError;
pub use events::{EventSender, EventStream, TrackingEvent};
pub use registry::Registry;
pub use types::*;

/// Result type alias for vrtrackd operations.
pub type Result<T, E = TrackdError> = std::result::Result<T, E>;
