use crate::transport::ReportChannel;
use crate::{Result, TrackdError};
use hidapi::HidApi;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};

const HIDRAW_IOCTL_TYPE: u8 = b'H';
const HIDIOC_NR_SET_FEATURE: u8 = 0x06;
const HIDIOC_NR_GET_FEATURE: u8 = 0x07;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

fn hidiocsfeature(len: usize) -> libc::c_ulong {
    ioctl_code(IOC_READ | IOC_WRITE, HIDRAW_IOCTL_TYPE, HIDIOC_NR_SET_FEATURE, len)
}

fn hidiocgfeature(len: usize) -> libc::c_ulong {
    ioctl_code(IOC_READ | IOC_WRITE, HIDRAW_IOCTL_TYPE, HIDIOC_NR_GET_FEATURE, len)
}

/// A `/dev/hidraw*` node.
///
/// Input reports are plain blocking `read(2)`s; feature reports go through
/// the `HIDIOCSFEATURE` / `HIDIOCGFEATURE` ioctls, so `buf[0]` is always the
/// report id.
pub struct HidrawChannel {
    file: File,
    path: String,
}

impl HidrawChannel {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TrackdError::from_open_io(path, e))?;
        Ok(Self {
            file,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn feature_ioctl(&self, request: libc::c_ulong, buf: *mut u8) -> Result<usize> {
        // SAFETY: the request encodes the length of `buf`, which the caller
        // keeps alive and exclusively borrowed for the duration of the call.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request, buf) };
        if ret < 0 {
            return Err(TrackdError::from_channel_io(std::io::Error::last_os_error()));
        }
        Ok(ret as usize)
    }
}

impl AsRawFd for HidrawChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl ReportChannel for HidrawChannel {
    fn read_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf).map_err(TrackdError::from_channel_io)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize> {
        // The ioctl is declared read/write, so hand it a private copy.
        let mut buf = data.to_vec();
        self.feature_ioctl(hidiocsfeature(buf.len()), buf.as_mut_ptr())
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.feature_ioctl(hidiocgfeature(buf.len()), buf.as_mut_ptr())
    }
}

/// HID interfaces of one physical device, keyed by interface number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidInterfaces {
    pub serial: Option<String>,
    pub paths: BTreeMap<i32, String>,
}

impl HidInterfaces {
    pub fn path(&self, interface: i32) -> Option<&str> {
        self.paths.get(&interface).map(String::as_str)
    }
}

/// Group the HID interfaces matching `vid:pid` by physical device.
///
/// hidapi reports every interface separately; interfaces of the same device
/// share a serial number.
pub fn find_interfaces(api: &HidApi, vid: u16, pid: u16) -> Vec<HidInterfaces> {
    let mut devices: Vec<HidInterfaces> = Vec::new();

    for info in api.device_list() {
        if info.vendor_id() != vid || info.product_id() != pid {
            continue;
        }
        let Ok(path) = info.path().to_str() else {
            log::warn!("Skipping HID device with non UTF-8 path {:?}", info.path());
            continue;
        };
        let serial = info.serial_number().map(str::to_string);

        match devices.iter_mut().find(|d| d.serial == serial) {
            Some(dev) => {
                dev.paths.insert(info.interface_number(), path.to_string());
            }
            None => {
                let mut paths = BTreeMap::new();
                paths.insert(info.interface_number(), path.to_string());
                devices.push(HidInterfaces { serial, paths });
            }
        }
    }

    devices
}
