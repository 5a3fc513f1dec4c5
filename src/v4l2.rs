//! V4L2 capture over the `v4l` crate: fixed format, memory-mapped streaming.

use crate::{Result, TrackdError};
use std::os::unix::io::{AsRawFd, RawFd};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC, Format};

/// Frame source used by the camera driver.
pub trait VideoCapture: Send {
    fn start_streaming(&mut self) -> Result<()>;
    fn stop_streaming(&mut self) -> Result<()>;
    /// Copy the next captured frame into `buf`; returns the frame's byte count.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// 8-bit greyscale.
pub const PIX_FMT_GREY: [u8; 4] = *b"GREY";

const BUFFER_COUNT: u32 = 4;

/// Capture format requested at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub pixelformat: [u8; 4],
    pub framerate: u32,
}

impl CaptureFormat {
    fn v4l_format(&self) -> Format {
        Format::new(self.width, self.height, FourCC::new(&self.pixelformat))
    }
}

/// A `/dev/video*` capture node.
pub struct V4l2Capture {
    device: Device,
    path: String,
    format: CaptureFormat,
    stream: Option<MmapStream<'static>>,
}

impl V4l2Capture {
    pub fn open(path: &str, format: CaptureFormat) -> Result<Self> {
        let device = Device::with_path(path).map_err(|e| TrackdError::from_open_io(path, e))?;
        Ok(Self {
            device,
            path: path.to_string(),
            format,
            stream: None,
        })
    }

    fn apply_format(&self) -> Result<()> {
        let requested = self.format.v4l_format();
        let actual = self
            .device
            .set_format(&requested)
            .map_err(TrackdError::from_channel_io)?;
        if actual.width != requested.width
            || actual.height != requested.height
            || actual.fourcc != requested.fourcc
        {
            return Err(TrackdError::InvalidState(format!(
                "{}: driver chose {}x{} {} instead of {}x{} {}",
                self.path,
                actual.width,
                actual.height,
                actual.fourcc,
                requested.width,
                requested.height,
                requested.fourcc
            )));
        }

        // uvcvideo picks the nearest supported interval; a refusal is not fatal.
        if let Err(e) = self.device.set_params(&Parameters::with_fps(self.format.framerate)) {
            log::debug!("{}: setting {} fps: {}", self.path, self.format.framerate, e);
        }
        Ok(())
    }
}

impl AsRawFd for V4l2Capture {
    fn as_raw_fd(&self) -> RawFd {
        self.device.handle().fd()
    }
}

impl VideoCapture for V4l2Capture {
    fn start_streaming(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.apply_format()?;

        let mut stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(TrackdError::from_channel_io)?;
        // `next` requeues the previously returned buffer before dequeuing,
        // starting with buffer 0, so that one is handed over on the first read.
        for index in 1..BUFFER_COUNT as usize {
            stream.queue(index).map_err(TrackdError::from_channel_io)?;
        }
        stream.start().map_err(TrackdError::from_channel_io)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        match self.stream.take() {
            // dropping the stream releases the mapped buffers
            Some(mut stream) => stream.stop().map_err(TrackdError::from_channel_io),
            None => Ok(()),
        }
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TrackdError::InvalidState(format!("{}: not streaming", self.path)))?;
        let (data, meta) = stream.next().map_err(TrackdError::from_channel_io)?;
        let used = (meta.bytesused as usize).min(data.len());
        let n = used.min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(used)
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        if let Err(e) = self.stop_streaming() {
            log::debug!("{}: stopping stream on close: {}", self.path, e);
        }
    }
}
