use crate::camera::{self, Dk2Camera};
use crate::config::TrackdConfig;
use crate::debug::DebugSink;
use crate::device::{Device, DeviceState, Driver};
use crate::events::EventSender;
use crate::hid;
use crate::protocol::{
    PID_CAMERA_DK2, PID_VIVE_HEADSET, VID_OCULUS, VID_VALVE, VIVE_IMU_INTERFACE,
    VIVE_LIGHTHOUSE_INTERFACE,
};
use crate::types::DeviceKind;
use crate::vive::ViveHeadset;
use crate::Result;
use hidapi::HidApi;

/// Which supported device a USB id belongs to, if any.
pub fn device_kind(vid: u16, pid: u16) -> Option<DeviceKind> {
    match (vid, pid) {
        (VID_VALVE, PID_VIVE_HEADSET) => Some(DeviceKind::Hmd),
        (VID_OCULUS, PID_CAMERA_DK2) => Some(DeviceKind::Camera),
        _ => None,
    }
}

/// Owns every opened device.
pub struct Registry {
    config: TrackdConfig,
    events: EventSender,
    debug: DebugSink,
    devices: Vec<Device>,
}

impl Registry {
    pub fn new(config: TrackdConfig, events: EventSender) -> Self {
        let debug = DebugSink::new(&config);
        Self {
            config,
            events,
            debug,
            devices: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackdConfig {
        &self.config
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn contains_devnode(&self, devnode: &str) -> bool {
        self.devices.iter().any(|d| d.identity().devnode == devnode)
    }

    /// Take ownership of an opened device. Devices are keyed by devnode;
    /// a duplicate is stopped and dropped.
    pub fn add(&mut self, mut device: Device) -> bool {
        if self.contains_devnode(&device.identity().devnode) {
            log::debug!("{}: already registered", device.name());
            device.stop();
            return false;
        }
        self.devices.push(device);
        true
    }

    /// Open `devnode` with `opener` and register the result.
    pub fn open_with<F>(&mut self, devnode: &str, opener: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<Box<dyn Driver>>,
    {
        let device = Device::open(devnode, self.events.clone(), opener)?;
        self.add(device);
        Ok(())
    }

    /// Open every Vive headset hidapi can see. Returns how many were added.
    pub fn discover_vive(&mut self) -> Result<usize> {
        let api = HidApi::new()?;
        let mut added = 0;

        for found in hid::find_interfaces(&api, VID_VALVE, PID_VIVE_HEADSET) {
            let (Some(imu_path), Some(lighthouse_path)) = (
                found.path(VIVE_IMU_INTERFACE),
                found.path(VIVE_LIGHTHOUSE_INTERFACE),
            ) else {
                log::debug!("Vive Headset: incomplete interface set {:?}", found.paths);
                continue;
            };
            if self.contains_devnode(imu_path) {
                continue;
            }

            let config = &self.config;
            let history = self.debug.enabled().then(|| self.debug.imu_history());
            let serial = found.serial.clone();
            let opened = Device::open(imu_path, self.events.clone(), |node| {
                let mut hmd = ViveHeadset::open(node, lighthouse_path, serial, config)?;
                if let Some(history) = history {
                    hmd = hmd.with_imu_history(history);
                }
                Ok(Box::new(hmd) as Box<dyn Driver>)
            });
            // Open failures are already logged.
            if let Ok(device) = opened {
                if self.add(device) {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Open the DK2 camera whose video node is `video_node`.
    pub fn add_dk2_camera(&mut self, video_node: &str) -> Result<()> {
        let config = &self.config;
        let debug = &self.debug;
        let device = Device::open(video_node, self.events.clone(), |node| {
            let stream = match debug.open_stream("Camera DK2", camera::WIDTH, camera::HEIGHT) {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Camera DK2: debug stream unavailable: {}", e);
                    None
                }
            };
            let cam = Dk2Camera::open(node, config)?.with_debug(stream, debug.imu_history());
            Ok(Box::new(cam) as Box<dyn Driver>)
        })?;
        self.add(device);
        Ok(())
    }

    /// Start every device that is not running yet. Failures are logged and
    /// leave the device registered for a later retry.
    pub fn start_all(&mut self) -> usize {
        let mut started = 0;
        for device in &mut self.devices {
            if device.state() != DeviceState::Opening {
                continue;
            }
            match device.start() {
                Ok(()) => started += 1,
                // already reported where the startup step failed
                Err(e) => log::debug!("{}: not started: {}", device.name(), e),
            }
        }
        started
    }

    /// Stop and drop devices whose poll loop ended on its own.
    /// Returns the names of the removed devices.
    pub fn reap_inactive(&mut self) -> Vec<String> {
        let mut reaped = Vec::new();
        self.devices.retain_mut(|device| {
            if device.state() == DeviceState::Running && !device.is_active() {
                device.stop();
                reaped.push(device.name().to_string());
                false
            } else {
                true
            }
        });
        for name in &reaped {
            log::info!("{}: removed", name);
        }
        reaped
    }

    /// Stop every device, in reverse registration order.
    pub fn stop_all(&mut self) {
        for device in self.devices.iter_mut().rev() {
            device.stop();
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{capture_warnings, warnings_here, FakeDriver};
    use crate::events::{self, TrackingEvent};
    use std::time::Duration;

    fn open_fake(registry: &mut Registry, driver: FakeDriver) {
        let devnode = format!("/dev/{}", driver.identity().name);
        registry
            .open_with(&devnode, move |_| Ok(Box::new(driver) as Box<dyn Driver>))
            .unwrap();
    }

    #[test]
    fn test_device_kind() {
        assert_eq!(device_kind(0x28de, 0x2000), Some(DeviceKind::Hmd));
        assert_eq!(device_kind(0x2833, 0x0201), Some(DeviceKind::Camera));
        assert_eq!(device_kind(0x28de, 0x2101), None);
        assert_eq!(device_kind(0x046d, 0xc52b), None);
    }

    #[test]
    fn test_duplicate_devnode_rejected() {
        let (tx, _rx) = events::channel(8);
        let mut registry = Registry::new(TrackdConfig::default(), tx);
        open_fake(&mut registry, FakeDriver::new("cam"));
        open_fake(&mut registry, FakeDriver::new("cam"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failing_device_stays_retryable() {
        let (tx, _rx) = events::channel(8);
        let mut registry = Registry::new(TrackdConfig::default(), tx);
        let broken = FakeDriver::new("broken");
        let fail = broken.fail_stage.clone();
        *fail.lock().unwrap() = Some("sensor setup");
        open_fake(&mut registry, broken);
        open_fake(&mut registry, FakeDriver::new("good"));

        assert_eq!(registry.start_all(), 1);
        assert_eq!(registry.devices()[0].state(), DeviceState::Opening);
        assert_eq!(registry.devices()[1].state(), DeviceState::Running);

        *fail.lock().unwrap() = None;
        assert_eq!(registry.start_all(), 1);
        assert!(registry
            .devices()
            .iter()
            .all(|d| d.state() == DeviceState::Running));

        registry.stop_all();
        assert!(registry
            .devices()
            .iter()
            .all(|d| d.state() == DeviceState::Closed));
    }

    #[test]
    fn test_reap_disconnected_devices() {
        let (tx, rx) = events::channel(8);
        let mut registry = Registry::new(TrackdConfig::default(), tx);
        let mut gone = FakeDriver::new("gone");
        gone.disconnect = true;
        open_fake(&mut registry, gone);
        open_fake(&mut registry, FakeDriver::new("alive"));
        assert_eq!(registry.start_all(), 2);

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            TrackingEvent::Disconnected { device } => assert_eq!(&*device, "gone"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(registry.reap_inactive(), vec!["gone".to_string()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.devices()[0].name(), "alive");
    }

    #[test]
    fn test_start_all_reports_failure_once() {
        capture_warnings();
        let (tx, _rx) = events::channel(8);
        let mut registry = Registry::new(TrackdConfig::default(), tx);
        let broken = FakeDriver::new("broken-once");
        *broken.fail_stage.lock().unwrap() = Some("streaming");
        open_fake(&mut registry, broken);

        assert_eq!(registry.start_all(), 0);
        let warnings = warnings_here();
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].starts_with("broken-once: streaming failed"));
        registry.stop_all();
    }
}
