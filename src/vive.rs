//! HTC Vive headset: IMU and lighthouse receiver over two hidraw nodes.

use crate::config::TrackdConfig;
use crate::debug::ImuHistory;
use crate::device::{ActiveFlag, Driver, LoopExit, Startup};
use crate::events::{EventSender, TrackingEvent};
use crate::headset_config::{self, HeadsetConfig};
use crate::hid::HidrawChannel;
use crate::imu::{ImuDecode, ImuDecoder};
use crate::lighthouse::{LighthouseEvent, Watchman};
use crate::poll_loop::{PollLoop, ReportHandler};
use crate::protocol::{
    self, FirmwareVersion, FIRMWARE_VERSION_REPORT_ID, FIRMWARE_VERSION_REPORT_SIZE,
    RANGE_MODES_REPORT_ID, RANGE_MODES_REPORT_SIZE,
};
use crate::transport::{FdPoller, Poller, ReportChannel};
use crate::types::{DeviceIdentity, DeviceKind};
use crate::Result;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

const IMU_CHANNEL: usize = 0;
const LIGHTHOUSE_CHANNEL: usize = 1;
/// Larger than any expected report so oversized ones are detected.
const READ_BUFFER_SIZE: usize = 128;

pub struct ViveHeadset {
    identity: DeviceIdentity,
    name: Arc<str>,
    imu_channel: Box<dyn ReportChannel>,
    lighthouse_channel: Box<dyn ReportChannel>,
    poller: Box<dyn Poller>,
    imu: ImuDecoder,
    watchman: Watchman,
    firmware: Option<FirmwareVersion>,
    poll_timeout: Duration,
    imu_history: Option<Arc<ImuHistory>>,
}

impl ViveHeadset {
    /// Build a headset from already opened channels. The poller must watch
    /// the IMU channel first and the lighthouse channel second.
    pub fn new(
        identity: DeviceIdentity,
        imu_channel: Box<dyn ReportChannel>,
        lighthouse_channel: Box<dyn ReportChannel>,
        poller: Box<dyn Poller>,
        config: &TrackdConfig,
    ) -> Self {
        Self {
            name: Arc::from(identity.name.as_str()),
            identity,
            imu_channel,
            lighthouse_channel,
            poller,
            imu: ImuDecoder::new(),
            watchman: Watchman::new(),
            firmware: None,
            poll_timeout: config.poll_timeout,
            imu_history: None,
        }
    }

    /// Open the IMU and lighthouse hidraw nodes of one headset.
    pub fn open(
        imu_path: &str,
        lighthouse_path: &str,
        serial: Option<String>,
        config: &TrackdConfig,
    ) -> Result<Self> {
        let imu = HidrawChannel::open(imu_path)?;
        let lighthouse = HidrawChannel::open(lighthouse_path)?;
        let poller = FdPoller::new(vec![imu.as_raw_fd(), lighthouse.as_raw_fd()]);
        let identity = DeviceIdentity {
            name: "Vive Headset".to_string(),
            serial,
            devnode: imu_path.to_string(),
            kind: DeviceKind::Hmd,
        };
        Ok(Self::new(
            identity,
            Box::new(imu),
            Box::new(lighthouse),
            Box::new(poller),
            config,
        ))
    }

    /// Feed decoded IMU samples into `history` as well.
    pub fn with_imu_history(mut self, history: Arc<ImuHistory>) -> Self {
        self.imu_history = Some(history);
        self
    }

    pub fn firmware(&self) -> Option<&FirmwareVersion> {
        self.firmware.as_ref()
    }

    pub fn imu(&self) -> &ImuDecoder {
        &self.imu
    }

    pub fn watchman(&self) -> &Watchman {
        &self.watchman
    }

    fn read_firmware_version(&mut self) -> Result<()> {
        let mut buf = [0u8; FIRMWARE_VERSION_REPORT_SIZE];
        buf[0] = FIRMWARE_VERSION_REPORT_ID;
        let n = self.imu_channel.get_feature_report(&mut buf)?;
        let version = protocol::parse_firmware_version(&buf[..n])?;
        log::info!("{}: Firmware version {}", self.name, version);
        self.firmware = Some(version);
        Ok(())
    }

    fn read_config(&mut self) -> Result<()> {
        let json = headset_config::read_config_json(self.imu_channel.as_mut())?;
        let (config, warnings) = HeadsetConfig::parse(&json)?;
        for warning in warnings {
            log::warn!("{}: Configuration: {}", self.name, warning);
        }
        for finding in config.check_identity(self.identity.serial.as_deref()) {
            log::warn!("{}: {}", self.name, finding);
        }
        if !config.model.is_valid() {
            log::warn!("{}: Failed to parse lighthouse model", self.name);
        }
        self.imu.set_calibration(config.imu);
        self.watchman.model = config.model;
        Ok(())
    }

    fn enable_lighthouse(&mut self) -> Result<()> {
        self.imu_channel
            .send_feature_report(&protocol::build_lighthouse_enable(true))?;
        Ok(())
    }

    fn reset_lighthouse(&mut self) -> Result<()> {
        self.imu_channel
            .send_feature_report(&protocol::build_lighthouse_reset())?;
        Ok(())
    }

    fn disable_sensors(&mut self) {
        if let Err(e) = self
            .imu_channel
            .send_feature_report(&protocol::build_lighthouse_enable(false))
        {
            log::warn!("{}: Failed to disable lighthouse receiver: {}", self.name, e);
        }
    }
}

impl Driver for ViveHeadset {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn start(&mut self, events: &EventSender) -> Result<()> {
        let mut startup = Startup::new(self.identity.name.clone(), self);
        startup.step("firmware version", |hmd| hmd.read_firmware_version())?;
        startup.step("configuration", |hmd| hmd.read_config())?;
        startup.step_with_undo(
            "lighthouse receiver",
            |hmd| hmd.enable_lighthouse(),
            |hmd| hmd.disable_sensors(),
        )?;
        startup.step("receiver reset", |hmd| hmd.reset_lighthouse())?;
        startup.commit();

        if self.watchman.model.is_valid() {
            events.emit(TrackingEvent::LighthouseModel {
                device: Arc::clone(&self.name),
                model: self.watchman.model.clone(),
            });
        }
        Ok(())
    }

    fn run(&mut self, active: &ActiveFlag, events: &EventSender) -> LoopExit {
        let mut reports = ViveReports {
            name: &self.name,
            imu_channel: self.imu_channel.as_mut(),
            lighthouse_channel: self.lighthouse_channel.as_mut(),
            imu: &mut self.imu,
            watchman: &mut self.watchman,
            history: self.imu_history.as_deref(),
            events,
            buf: [0u8; READ_BUFFER_SIZE],
        };
        PollLoop::new(&self.identity.name, self.poll_timeout).run(
            self.poller.as_mut(),
            active,
            &mut reports,
        )
    }

    fn stop(&mut self) {
        self.disable_sensors();
    }
}

/// Borrowed view of the headset used inside the poll loop.
struct ViveReports<'a> {
    name: &'a Arc<str>,
    imu_channel: &'a mut dyn ReportChannel,
    lighthouse_channel: &'a mut dyn ReportChannel,
    imu: &'a mut ImuDecoder,
    watchman: &'a mut Watchman,
    history: Option<&'a ImuHistory>,
    events: &'a EventSender,
    buf: [u8; READ_BUFFER_SIZE],
}

impl ViveReports<'_> {
    fn handle_imu(&mut self) -> Result<()> {
        let n = self.imu_channel.read_report(&mut self.buf)?;
        match self.imu.decode(&self.buf[..n])? {
            ImuDecode::Samples { sequence, samples } => {
                if let Some(history) = self.history {
                    samples.iter().for_each(|s| history.push(*s));
                }
                self.events.emit(TrackingEvent::Imu {
                    device: Arc::clone(self.name),
                    sequence,
                    samples,
                });
            }
            ImuDecode::AwaitingRange => log::debug!("{}: IMU report before range modes", self.name),
            ImuDecode::Duplicate => log::debug!("{}: Duplicate IMU report", self.name),
        }
        Ok(())
    }

    fn handle_pulses(&mut self) -> Result<()> {
        let n = self.lighthouse_channel.read_report(&mut self.buf)?;
        let (name, events) = (self.name, self.events);
        self.watchman.decode_report(&self.buf[..n], |event| {
            let device = Arc::clone(name);
            events.emit(match event {
                LighthouseEvent::Pulse(pulse) => TrackingEvent::Pulse { device, pulse },
                LighthouseEvent::Vsync(timestamp) => TrackingEvent::Vsync { device, timestamp },
            });
        })?;
        Ok(())
    }
}

impl ReportHandler for ViveReports<'_> {
    fn before_reads(&mut self) -> Result<()> {
        if !self.imu.needs_range_modes() {
            return Ok(());
        }
        let mut buf = [0u8; RANGE_MODES_REPORT_SIZE];
        buf[0] = RANGE_MODES_REPORT_ID;
        let n = self.imu_channel.get_feature_report(&mut buf)?;
        let range = protocol::parse_range_modes(&buf[..n])?;
        log::debug!(
            "{}: IMU range {:.6} rad/s, {:.6} m/s² per LSB",
            self.name,
            range.gyro_range,
            range.accel_range
        );
        self.imu.set_range_modes(range);
        Ok(())
    }

    fn handle_readable(&mut self, index: usize) -> Result<()> {
        match index {
            IMU_CHANNEL => self.handle_imu(),
            LIGHTHOUSE_CHANNEL => self.handle_pulses(),
            _ => Ok(()),
        }
    }
}
