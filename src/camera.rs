//! Oculus Rift DK2 positional tracking camera.

use crate::config::TrackdConfig;
use crate::debug::{DebugAttachment, DebugStream, ImuHistory};
use crate::device::{ActiveFlag, Driver, LoopExit, Startup};
use crate::eeprom;
use crate::error::ProtocolError;
use crate::esp570::{self, Esp570, UsbEsp570};
use crate::events::{EventSender, TrackingEvent};
use crate::mt9v034;
use crate::poll_loop::{PollLoop, ReportHandler};
use crate::transport::{FdPoller, Poller};
use crate::types::{CameraIntrinsics, DeviceIdentity, DeviceKind};
use crate::v4l2::{CaptureFormat, V4l2Capture, VideoCapture, PIX_FMT_GREY};
use crate::Result;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 752;
pub const HEIGHT: u32 = 480;
pub const FRAMERATE: u32 = 60;

/// I²C address of the unidentified chip touched at the end of startup.
const VENDOR_I2C_ADDR: u8 = 0x60;
/// Register writes replayed from the vendor driver. Their effect is unknown.
const VENDOR_WRITES: [(u8, u16); 2] = [(0x05, 0x0001), (0x06, 0x0020)];

pub fn capture_format() -> CaptureFormat {
    CaptureFormat {
        width: WIDTH,
        height: HEIGHT,
        pixelformat: PIX_FMT_GREY,
        framerate: FRAMERATE,
    }
}

/// Requested exposure-sync setting, shared with the running poll thread.
#[derive(Debug, Clone, Default)]
pub struct SyncControl(Arc<AtomicBool>);

impl SyncControl {
    /// Request sync on or off. Returns false if that was already requested.
    pub fn set_sync_exposure(&self, sync: bool) -> bool {
        self.0.swap(sync, Ordering::SeqCst) != sync
    }

    pub fn sync_exposure(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Dk2Camera {
    identity: DeviceIdentity,
    name: Arc<str>,
    capture: Box<dyn VideoCapture>,
    bridge: Box<dyn Esp570>,
    poller: Box<dyn Poller>,
    version: Option<String>,
    intrinsics: Option<CameraIntrinsics>,
    sync: SyncControl,
    /// Sync mode currently programmed into the sensor.
    applied_sync: Option<bool>,
    poll_timeout: Duration,
    debug: Option<DebugStream>,
    imu_history: Option<Arc<ImuHistory>>,
    frames: u64,
}

impl Dk2Camera {
    /// Wrap opened parts and read the camera's identity and calibration.
    ///
    /// Missing calibration is not an error; the camera simply has no
    /// intrinsics.
    pub fn new(
        devnode: &str,
        capture: Box<dyn VideoCapture>,
        mut bridge: Box<dyn Esp570>,
        poller: Box<dyn Poller>,
        config: &TrackdConfig,
    ) -> Result<Self> {
        let name = "Camera DK2";
        if let Err(e) = bridge.vendor_setup() {
            log::warn!("{}: ESP570 vendor setup failed: {}", name, e);
        }
        let version = eeprom::read_version(bridge.as_mut());
        let serial = eeprom::read_serial(bridge.as_mut());

        let intrinsics = match eeprom::read_intrinsics(bridge.as_mut()) {
            Ok(intrinsics) => Some(intrinsics),
            Err(e) => {
                log::warn!("{}: No calibration: {}", name, e);
                None
            }
        };

        let identity = DeviceIdentity {
            name: name.to_string(),
            serial,
            devnode: devnode.to_string(),
            kind: DeviceKind::Camera,
        };
        let sync = SyncControl::default();
        sync.set_sync_exposure(config.camera_sync);

        Ok(Self {
            name: Arc::from(name),
            identity,
            capture,
            bridge,
            poller,
            version,
            intrinsics,
            sync,
            applied_sync: None,
            poll_timeout: config.poll_timeout,
            debug: None,
            imu_history: None,
            frames: 0,
        })
    }

    /// Open the V4L2 node and the ESP570 bridge of the same USB device.
    pub fn open(devnode: &str, config: &TrackdConfig) -> Result<Self> {
        let capture = V4l2Capture::open(devnode, capture_format())?;
        let poller = FdPoller::new(vec![capture.as_raw_fd()]);
        let bridge = UsbEsp570::open_at(esp570::usb_location(devnode)?)?;
        Self::new(
            devnode,
            Box::new(capture),
            Box::new(bridge),
            Box::new(poller),
            config,
        )
    }

    pub fn with_debug(mut self, stream: Option<DebugStream>, imu_history: Arc<ImuHistory>) -> Self {
        self.debug = stream;
        self.imu_history = Some(imu_history);
        self
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.intrinsics.as_ref()
    }

    /// Handle for changing the exposure sync while the camera runs.
    pub fn sync_control(&self) -> SyncControl {
        self.sync.clone()
    }

    /// Request exposure sync. A no-op if unchanged; the sensor is only
    /// reprogrammed while the camera is running.
    pub fn set_sync_exposure(&self, sync: bool) -> bool {
        self.sync.set_sync_exposure(sync)
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    fn apply_sync(&mut self) -> Result<()> {
        let sync = self.sync.sync_exposure();
        mt9v034::set_sync(self.bridge.as_mut(), sync)?;
        self.applied_sync = Some(sync);
        Ok(())
    }

    fn vendor_writes(&mut self) -> Result<()> {
        for (reg, value) in VENDOR_WRITES {
            self.bridge.i2c_write(VENDOR_I2C_ADDR, reg, value)?;
        }
        Ok(())
    }

    fn stop_streaming(&mut self) {
        if let Err(e) = self.capture.stop_streaming() {
            log::warn!("{}: Failed to stop streaming: {}", self.name, e);
        }
    }
}

impl Driver for Dk2Camera {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn start(&mut self, events: &EventSender) -> Result<()> {
        let mut startup = Startup::new(self.identity.name.clone(), self);
        startup.step_with_undo(
            "streaming",
            |cam| cam.capture.start_streaming(),
            |cam| cam.stop_streaming(),
        )?;
        startup.step("sensor setup", |cam| mt9v034::sensor_setup(cam.bridge.as_mut()))?;
        startup.best_effort("exposure sync", |cam| cam.apply_sync());
        startup.best_effort("vendor setup", |cam| cam.vendor_writes());
        startup.commit();

        if let Some(intrinsics) = self.intrinsics {
            events.emit(TrackingEvent::CameraIntrinsics {
                device: Arc::clone(&self.name),
                intrinsics,
            });
        }
        Ok(())
    }

    fn run(&mut self, active: &ActiveFlag, _events: &EventSender) -> LoopExit {
        let mut frames = CameraFrames {
            name: &self.name,
            capture: self.capture.as_mut(),
            bridge: self.bridge.as_mut(),
            sync: &self.sync,
            applied_sync: &mut self.applied_sync,
            debug: self.debug.as_mut(),
            imu_history: self.imu_history.as_deref(),
            frames: &mut self.frames,
            frame: vec![0u8; (WIDTH * HEIGHT) as usize],
            epoch: Instant::now(),
        };
        PollLoop::new(&self.identity.name, self.poll_timeout).run(
            self.poller.as_mut(),
            active,
            &mut frames,
        )
    }

    fn stop(&mut self) {
        self.stop_streaming();
    }
}

struct CameraFrames<'a> {
    name: &'a Arc<str>,
    capture: &'a mut dyn VideoCapture,
    bridge: &'a mut dyn Esp570,
    sync: &'a SyncControl,
    applied_sync: &'a mut Option<bool>,
    debug: Option<&'a mut DebugStream>,
    imu_history: Option<&'a ImuHistory>,
    frames: &'a mut u64,
    frame: Vec<u8>,
    epoch: Instant,
}

impl CameraFrames<'_> {
    /// Blob extraction happens downstream; frames are only counted here.
    fn process_frame(&mut self) {
        *self.frames += 1;
    }

    /// Reprogram the sensor if the requested sync differs from the applied one.
    fn apply_pending_sync(&mut self) -> Result<()> {
        let requested = self.sync.sync_exposure();
        if *self.applied_sync != Some(requested) {
            mt9v034::set_sync(&mut *self.bridge, requested)?;
            *self.applied_sync = Some(requested);
            log::info!(
                "{}: exposure sync {}",
                self.name,
                if requested { "enabled" } else { "disabled" }
            );
        }
        Ok(())
    }

    fn push_debug(&mut self, received: u64) {
        let Some(debug) = self.debug.as_deref_mut() else {
            return;
        };
        if !debug.is_connected() {
            return;
        }
        let mut attachment = DebugAttachment::new();
        if let Some(history) = self.imu_history {
            attachment.imu = history.drain();
        }
        attachment.push_timestamp(received);
        attachment.push_timestamp(self.epoch.elapsed().as_micros() as u64);
        debug.push_frame(&self.frame, Some(&attachment));
    }
}

impl ReportHandler for CameraFrames<'_> {
    fn before_reads(&mut self) -> Result<()> {
        self.apply_pending_sync()
    }

    fn on_idle(&mut self) -> Result<()> {
        self.apply_pending_sync()
    }

    fn handle_readable(&mut self, _index: usize) -> Result<()> {
        let received = self.epoch.elapsed().as_micros() as u64;
        let n = self.capture.read_frame(&mut self.frame)?;
        if n != self.frame.len() {
            return Err(ProtocolError::WrongLength {
                id: 0,
                len: n,
                expected: self.frame.len(),
            }
            .into());
        }
        self.process_frame();
        self.push_debug(received);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceState};
    use crate::esp570::mock::MockBridge;
    use crate::events;
    use crate::protocol::{intrinsics_offset, EEPROM_CALIBRATION_ADDR, EEPROM_SERIAL_ADDR};
    use crate::transport::mock::MockPoller;
    use crate::transport::Readiness;
    use crate::v4l2::mock::MockCapture;
    use crate::TrackdError;

    fn eeprom_image() -> Vec<u8> {
        let mut image = vec![0u8; 0x4000];
        let at = EEPROM_CALIBRATION_ADDR as usize + intrinsics_offset::FX;
        image[at..at + 8].copy_from_slice(&700.5f64.to_le_bytes());
        let at = EEPROM_SERIAL_ADDR as usize;
        image[at..at + 8].copy_from_slice(b"WMTD3021");
        image
    }

    fn camera(
        capture: &MockCapture,
        bridge: &MockBridge,
        script: Vec<Vec<Readiness>>,
    ) -> Dk2Camera {
        camera_with(capture, bridge, script, &TrackdConfig::default())
    }

    fn camera_with(
        capture: &MockCapture,
        bridge: &MockBridge,
        script: Vec<Vec<Readiness>>,
        config: &TrackdConfig,
    ) -> Dk2Camera {
        Dk2Camera::new(
            "/dev/video0",
            Box::new(capture.clone()),
            Box::new(bridge.clone()),
            Box::new(MockPoller::new(1, script)),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_open_reads_identity_and_calibration() {
        let bridge = MockBridge::with_eeprom(eeprom_image());
        let cam = camera(&MockCapture::default(), &bridge, vec![]);

        assert_eq!(bridge.lock().vendor_setups, 1);
        assert_eq!(cam.identity().serial.as_deref(), Some("WMTD3021"));
        assert_eq!(cam.intrinsics().map(|k| k.fx()), Some(700.5));
    }

    #[test]
    fn test_failed_vendor_setup_still_opens() {
        let bridge = MockBridge::with_eeprom(eeprom_image());
        bridge.lock().fail_vendor_setup = true;
        let cam = camera(&MockCapture::default(), &bridge, vec![]);

        assert_eq!(bridge.lock().vendor_setups, 1);
        assert_eq!(cam.identity().serial.as_deref(), Some("WMTD3021"));
        assert_eq!(cam.intrinsics().map(|k| k.fx()), Some(700.5));
    }

    #[test]
    fn test_incomplete_calibration_is_not_fatal() {
        let bridge = MockBridge::with_eeprom(eeprom_image());
        bridge.lock().short_reads.push(0x2060);
        let cam = camera(&MockCapture::default(), &bridge, vec![]);
        assert!(cam.intrinsics().is_none());
    }

    #[test]
    fn test_start_sequence() {
        let capture = MockCapture::default();
        let bridge = MockBridge::with_eeprom(eeprom_image());
        let mut cam = camera(&capture, &bridge, vec![]);
        let (tx, rx) = events::channel(4);

        cam.start(&tx).unwrap();

        assert!(capture.lock().streaming);
        let writes = bridge.lock().writes.clone();
        let tail = &writes[writes.len() - 3..];
        assert_eq!(
            tail,
            &[
                (mt9v034::I2C_ADDR, mt9v034::reg::CHIP_CONTROL, mt9v034::CHIP_CONTROL_MASTER),
                (0x60, 0x05, 0x0001),
                (0x60, 0x06, 0x0020),
            ]
        );
        assert!(matches!(
            rx.try_recv(),
            Some(TrackingEvent::CameraIntrinsics { .. })
        ));
    }

    #[test]
    fn test_sensor_failure_stops_streaming_once() {
        let capture = MockCapture::default();
        let bridge = MockBridge::with_eeprom(eeprom_image());
        bridge.lock().fail_write_at = Some(0);
        let (tx, rx) = events::channel(4);
        let cam = camera(&capture, &bridge, vec![]);
        let mut device = Device::open("/dev/video0", tx, move |_| Ok(Box::new(cam) as Box<dyn Driver>)).unwrap();

        let err = device.start().unwrap_err();
        assert!(matches!(
            err,
            TrackdError::StartupStepFailed {
                step: "sensor setup",
                ..
            }
        ));
        {
            let state = capture.lock();
            assert_eq!(state.starts, 1);
            assert_eq!(state.stops, 1);
            assert!(!state.streaming);
        }
        assert_eq!(device.state(), DeviceState::Opening);
        assert!(rx.try_recv().is_none());

        device.stop();
        assert_eq!(device.state(), DeviceState::Closed);
    }

    #[test]
    fn test_failed_sync_write_does_not_abort_start() {
        let capture = MockCapture::default();
        let bridge = MockBridge::with_eeprom(eeprom_image());
        let mut cam = camera(&capture, &bridge, vec![]);
        // sensor setup is nine writes, the sync write is the tenth
        bridge.lock().fail_write_at = Some(9);
        let (tx, _rx) = events::channel(4);

        cam.start(&tx).unwrap();
        assert!(capture.lock().streaming);
        assert_eq!(cam.applied_sync, None);
    }

    #[test]
    fn test_frames_and_sync_changes_in_loop() {
        let capture = MockCapture::default();
        let bridge = MockBridge::with_eeprom(eeprom_image());
        let read = vec![Readiness::READABLE];
        let mut cam = camera(&capture, &bridge, vec![read.clone(), read.clone(), read]);
        let (tx, _rx) = events::channel(4);
        cam.start(&tx).unwrap();

        let frame_len = (WIDTH * HEIGHT) as usize;
        capture.queue_frame(vec![0x10; frame_len]);
        capture.queue_frame(vec![0x10; frame_len / 2]);
        capture.queue_frame(vec![0x10; frame_len]);

        let control = cam.sync_control();
        assert!(!cam.set_sync_exposure(false));
        assert!(control.set_sync_exposure(true));
        let writes_before = bridge.lock().writes.len();

        let active = ActiveFlag::new();
        active.activate();
        assert_eq!(cam.run(&active, &tx), LoopExit::Disconnected);

        // the short frame was dropped
        assert_eq!(cam.frame_count(), 2);
        let writes = bridge.lock().writes.clone();
        assert_eq!(
            writes[writes_before..],
            [(mt9v034::I2C_ADDR, mt9v034::reg::CHIP_CONTROL, mt9v034::CHIP_CONTROL_SNAPSHOT)]
        );
        assert_eq!(cam.applied_sync, Some(true));

        cam.stop();
        assert!(!capture.lock().streaming);
    }

    #[test]
    fn test_sync_change_applied_while_idle() {
        let capture = MockCapture::default();
        let bridge = MockBridge::with_eeprom(eeprom_image());
        let config = TrackdConfig {
            camera_sync: true,
            ..TrackdConfig::default()
        };
        let idle = vec![Readiness::empty()];
        let mut cam = camera_with(&capture, &bridge, vec![idle.clone(), idle], &config);
        let (tx, _rx) = events::channel(4);
        cam.start(&tx).unwrap();
        assert_eq!(cam.applied_sync, Some(true));

        // no frames arrive, e.g. an external trigger that stopped
        assert!(cam.sync_control().set_sync_exposure(false));
        let writes_before = bridge.lock().writes.len();

        let active = ActiveFlag::new();
        active.activate();
        assert_eq!(cam.run(&active, &tx), LoopExit::Disconnected);

        assert_eq!(cam.frame_count(), 0);
        assert_eq!(cam.applied_sync, Some(false));
        let writes = bridge.lock().writes.clone();
        assert_eq!(
            writes[writes_before..],
            [(mt9v034::I2C_ADDR, mt9v034::reg::CHIP_CONTROL, mt9v034::CHIP_CONTROL_MASTER)]
        );
    }
}
