//! ESP570 USB bridge of the DK2 positional tracker.
//!
//! The bridge exposes the sensor's I²C bus and the calibration EEPROM
//! through a UVC extension unit. Every operation is a SET_CUR carrying a
//! command block followed, for reads, by a GET_CUR returning the data.

use crate::error::OpenError;
use crate::protocol::{PID_CAMERA_DK2, VID_OCULUS};
use crate::{Result, TrackdError};
use rusb::{DeviceHandle, GlobalContext};
use std::path::Path;
use std::time::Duration;

/// Random access reads from an attached EEPROM.
pub trait EepromBus {
    /// Read up to `buf.len()` bytes starting at `addr`. Returns the number
    /// of bytes actually read.
    fn eeprom_read(&mut self, addr: u16, buf: &mut [u8]) -> Result<usize>;
}

/// 16-bit register writes on an I²C bus.
pub trait I2cBus {
    fn i2c_write(&mut self, addr: u8, reg: u8, value: u16) -> Result<()>;
}

/// Everything the DK2 driver needs from the bridge.
pub trait Esp570: EepromBus + I2cBus + Send {
    /// Undocumented vendor initialization, issued once after open.
    fn vendor_setup(&mut self) -> Result<()>;
}

const VIDEO_CONTROL_INTERFACE: u8 = 0;
const XU_UNIT_ID: u8 = 4;
const XU_SELECTOR_BRIDGE: u8 = 2;
const XU_SELECTOR_SETUP: u8 = 3;
const XU_CONTROL_SIZE: usize = 59;

const UVC_SET_CUR: u8 = 0x01;
const UVC_GET_CUR: u8 = 0x81;
const REQUEST_TYPE_OUT: u8 = 0x21;
const REQUEST_TYPE_IN: u8 = 0xA1;

const CMD_EEPROM_READ: u8 = 0x82;
const CMD_I2C_WRITE: u8 = 0x86;
const EEPROM_I2C_ADDR: u8 = 0xA0;
/// Largest EEPROM read that fits one control block.
pub const MAX_EEPROM_READ: usize = 32;

/// Opaque setup block, replayed as captured from the vendor driver.
const VENDOR_SETUP_BLOCK: [u8; 4] = [0x80, 0x14, 0x00, 0x01];

const TIMEOUT: Duration = Duration::from_millis(500);

const SYSFS_ROOT: &str = "/sys";

/// Position of a device on the USB bus, as libusb reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbLocation {
    pub bus: u8,
    pub address: u8,
}

/// Find the USB device a V4L2 node belongs to.
pub fn usb_location(devnode: &str) -> Result<UsbLocation> {
    usb_location_in(Path::new(SYSFS_ROOT), devnode)
}

fn usb_location_in(sysfs: &Path, devnode: &str) -> Result<UsbLocation> {
    let not_found = || TrackdError::Open(OpenError::NotFound(devnode.to_string()));
    let name = Path::new(devnode)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(not_found)?;

    // `device` links to the UVC interface; bus and address sit on its parent.
    let link = sysfs.join("class/video4linux").join(name).join("device");
    let interface = std::fs::canonicalize(&link).map_err(|e| TrackdError::from_open_io(devnode, e))?;
    let usb_device = interface.parent().ok_or_else(not_found)?;

    let read = |file: &str| -> Result<u8> {
        let text = std::fs::read_to_string(usb_device.join(file))
            .map_err(|e| TrackdError::from_open_io(devnode, e))?;
        text.trim().parse().map_err(|_| {
            TrackdError::InvalidState(format!("{}: bad {} {:?}", devnode, file, text.trim()))
        })
    };
    Ok(UsbLocation {
        bus: read("busnum")?,
        address: read("devnum")?,
    })
}

/// Bridge access through libusb control transfers.
pub struct UsbEsp570 {
    handle: DeviceHandle<GlobalContext>,
}

impl UsbEsp570 {
    /// Open the DK2 camera at `location`.
    pub fn open_at(location: UsbLocation) -> Result<Self> {
        let devices = rusb::devices()?;
        let device = devices
            .iter()
            .find(|d| {
                d.bus_number() == location.bus
                    && d.address() == location.address
                    && d.device_descriptor()
                        .map(|desc| desc.vendor_id() == VID_OCULUS && desc.product_id() == PID_CAMERA_DK2)
                        .unwrap_or(false)
            })
            .ok_or_else(|| {
                TrackdError::Open(OpenError::NotFound(format!(
                    "DK2 camera at USB {:03}/{:03}",
                    location.bus, location.address
                )))
            })?;
        let handle = device.open()?;
        Ok(Self { handle })
    }

    fn set_cur(&self, selector: u8, block: &[u8; XU_CONTROL_SIZE]) -> Result<()> {
        let written = self.handle.write_control(
            REQUEST_TYPE_OUT,
            UVC_SET_CUR,
            u16::from(selector) << 8,
            u16::from(XU_UNIT_ID) << 8 | u16::from(VIDEO_CONTROL_INTERFACE),
            block,
            TIMEOUT,
        )?;
        if written != XU_CONTROL_SIZE {
            return Err(TrackdError::from_channel_io(std::io::Error::from_raw_os_error(
                libc::EIO,
            )));
        }
        Ok(())
    }

    fn get_cur(&self, selector: u8, block: &mut [u8; XU_CONTROL_SIZE]) -> Result<usize> {
        Ok(self.handle.read_control(
            REQUEST_TYPE_IN,
            UVC_GET_CUR,
            u16::from(selector) << 8,
            u16::from(XU_UNIT_ID) << 8 | u16::from(VIDEO_CONTROL_INTERFACE),
            block,
            TIMEOUT,
        )?)
    }
}

/// Build the bridge command block for an EEPROM read.
fn eeprom_read_block(addr: u16, len: usize) -> [u8; XU_CONTROL_SIZE] {
    let mut block = [0u8; XU_CONTROL_SIZE];
    block[0] = CMD_EEPROM_READ;
    block[1] = EEPROM_I2C_ADDR;
    block[2..4].copy_from_slice(&addr.to_be_bytes());
    block[4] = len.min(MAX_EEPROM_READ) as u8;
    block
}

/// Build the bridge command block for a 16-bit register write.
fn i2c_write_block(addr: u8, reg: u8, value: u16) -> [u8; XU_CONTROL_SIZE] {
    let mut block = [0u8; XU_CONTROL_SIZE];
    block[0] = CMD_I2C_WRITE;
    block[1] = addr;
    block[2] = reg;
    block[3..5].copy_from_slice(&value.to_be_bytes());
    block
}

impl EepromBus for UsbEsp570 {
    fn eeprom_read(&mut self, addr: u16, buf: &mut [u8]) -> Result<usize> {
        self.set_cur(XU_SELECTOR_BRIDGE, &eeprom_read_block(addr, buf.len()))?;
        let mut block = [0u8; XU_CONTROL_SIZE];
        let received = self.get_cur(XU_SELECTOR_BRIDGE, &mut block)?;
        let n = received.min(buf.len()).min(MAX_EEPROM_READ);
        buf[..n].copy_from_slice(&block[..n]);
        Ok(n)
    }
}

impl I2cBus for UsbEsp570 {
    fn i2c_write(&mut self, addr: u8, reg: u8, value: u16) -> Result<()> {
        self.set_cur(XU_SELECTOR_BRIDGE, &i2c_write_block(addr, reg, value))
    }
}

impl Esp570 for UsbEsp570 {
    fn vendor_setup(&mut self) -> Result<()> {
        let mut block = [0u8; XU_CONTROL_SIZE];
        block[..VENDOR_SETUP_BLOCK.len()].copy_from_slice(&VENDOR_SETUP_BLOCK);
        self.set_cur(XU_SELECTOR_SETUP, &block)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eeprom_read_block() {
        let block = eeprom_read_block(0x2040, 32);
        assert_eq!(&block[..5], &[0x82, 0xA0, 0x20, 0x40, 0x20]);
        assert!(block[5..].iter().all(|&b| b == 0));

        // Oversized requests are clamped to one block.
        assert_eq!(eeprom_read_block(0, 100)[4], 32);
    }

    #[test]
    fn test_i2c_write_block() {
        let block = i2c_write_block(0x60, 0x06, 0x0020);
        assert_eq!(&block[..5], &[0x86, 0x60, 0x06, 0x00, 0x20]);
    }

    /// A scratch sysfs tree with one video node under a USB device.
    fn fake_sysfs(tag: &str, busnum: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!("vrtrackd-sysfs-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let usb = root.join("devices/pci0000:00/usb3/3-2");
        let interface = usb.join("3-2:1.0");
        std::fs::create_dir_all(&interface).unwrap();
        std::fs::write(usb.join("busnum"), busnum).unwrap();
        std::fs::write(usb.join("devnum"), "7\n").unwrap();

        let class = root.join("class/video4linux/video1");
        std::fs::create_dir_all(&class).unwrap();
        std::os::unix::fs::symlink(&interface, class.join("device")).unwrap();
        root
    }

    #[test]
    fn test_usb_location_follows_video_node() {
        let root = fake_sysfs("ok", "3\n");
        let location = usb_location_in(&root, "/dev/video1").unwrap();
        assert_eq!(location, UsbLocation { bus: 3, address: 7 });

        // a second camera's node is not confused with this one
        let err = usb_location_in(&root, "/dev/video0").unwrap_err();
        assert!(err.is_not_found());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_usb_location_rejects_garbage() {
        let root = fake_sysfs("bad", "usb\n");
        let err = usb_location_in(&root, "/dev/video1").unwrap_err();
        assert!(matches!(err, TrackdError::InvalidState(_)));
        std::fs::remove_dir_all(&root).unwrap();
    }
}
