//! Optional raw-frame debug output.
//!
//! Each camera gets a Unix socket `vrtrackd-debug-N` in the configured
//! directory. A viewer connects to it and receives every frame, preceded by
//! a one-line JSON header describing the frame and its attachment. Frames
//! pushed while nobody is connected are dropped.

use crate::config::{DebugMode, TrackdConfig};
use crate::types::{ImuSample, Quaternion};
use crate::{Result, TrackdError};
use serde_json::json;
use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SOCKET_PREFIX: &str = "vrtrackd-debug-";
pub const MAX_STREAMS: usize = 10;
pub const IMU_HISTORY_CAPACITY: usize = 32;
pub const MAX_TIMESTAMPS: usize = 3;

const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Most recent IMU samples, shared between the headset that produces them
/// and the camera stream that attaches them to frames.
#[derive(Debug, Default)]
pub struct ImuHistory {
    samples: Mutex<VecDeque<ImuSample>>,
}

impl ImuHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&self, sample: ImuSample) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == IMU_HISTORY_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Take everything queued, oldest first.
    pub fn drain(&self) -> Vec<ImuSample> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State snapshot sent along with a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugAttachment {
    pub rotation: Option<Quaternion>,
    pub translation: Option<[f64; 3]>,
    pub imu: Vec<ImuSample>,
    timestamps: Vec<u64>,
}

impl DebugAttachment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processing timestamp; only the first three are kept.
    pub fn push_timestamp(&mut self, timestamp: u64) -> bool {
        if self.timestamps.len() == MAX_TIMESTAMPS {
            return false;
        }
        self.timestamps.push(timestamp);
        true
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "rotation": self.rotation.map(|q| [q.w, q.x, q.y, q.z]),
            "translation": self.translation,
            "imu": self.imu.iter().map(|s| json!({
                "time": s.time,
                "angular_velocity": s.angular_velocity,
                "acceleration": s.acceleration,
            })).collect::<Vec<_>>(),
            "timestamps": self.timestamps,
        })
    }
}

/// Owner of debug-socket allocation, created once at startup.
pub struct DebugSink {
    mode: DebugMode,
    dir: PathBuf,
    in_use: Arc<Mutex<[bool; MAX_STREAMS]>>,
    imu_history: Arc<ImuHistory>,
}

impl DebugSink {
    /// Create the sink. When enabled, leftover sockets from an earlier run
    /// are removed from the debug directory.
    pub fn new(config: &TrackdConfig) -> Self {
        let sink = Self {
            mode: config.debug,
            dir: config.debug_dir.clone(),
            in_use: Arc::default(),
            imu_history: Arc::new(ImuHistory::new()),
        };
        if sink.enabled() {
            if config.debug == DebugMode::Shm {
                log::info!("Debug: shared memory output is served over sockets");
            }
            sink.remove_stale_sockets();
        }
        sink
    }

    pub fn disabled() -> Self {
        Self::new(&TrackdConfig::default())
    }

    pub fn enabled(&self) -> bool {
        self.mode.enabled()
    }

    pub fn imu_history(&self) -> Arc<ImuHistory> {
        Arc::clone(&self.imu_history)
    }

    fn socket_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}{}", SOCKET_PREFIX, index))
    }

    fn remove_stale_sockets(&self) {
        for index in 0..MAX_STREAMS {
            let path = self.socket_path(index);
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("Debug: removed stale {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("Debug: failed to remove {}: {}", path.display(), e),
            }
        }
    }

    /// Open a stream for one device on the first free socket index.
    /// Returns `None` when debug output is disabled.
    pub fn open_stream(&self, device: &str, width: u32, height: u32) -> Result<Option<DebugStream>> {
        if !self.enabled() {
            return Ok(None);
        }

        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        let index = (0..MAX_STREAMS)
            .find(|&i| !in_use[i] && !self.socket_path(i).exists())
            .ok_or_else(|| TrackdError::Config(format!("{}: no free debug socket", device)))?;
        let path = self.socket_path(index);

        let listener = UnixListener::bind(&path).map_err(|e| {
            TrackdError::Config(format!("{}: binding {}: {}", device, path.display(), e))
        })?;
        listener
            .set_nonblocking(true)
            .map_err(TrackdError::from_channel_io)?;
        in_use[index] = true;
        log::info!("{}: debug stream at {}", device, path.display());

        Ok(Some(DebugStream {
            name: device.to_string(),
            listener,
            path,
            index,
            in_use: Arc::clone(&self.in_use),
            subscriber: None,
            width,
            height,
            frames_sent: 0,
        }))
    }
}

/// One device's debug socket.
pub struct DebugStream {
    name: String,
    listener: UnixListener,
    path: PathBuf,
    index: usize,
    in_use: Arc<Mutex<[bool; MAX_STREAMS]>>,
    subscriber: Option<UnixStream>,
    width: u32,
    height: u32,
    frames_sent: u64,
}

impl DebugStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    fn accept(&mut self) {
        if self.subscriber.is_some() {
            return;
        }
        match self.listener.accept() {
            Ok((stream, _)) => {
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_write_timeout(Some(WRITE_TIMEOUT)));
                match configured {
                    Ok(()) => {
                        log::info!("{}: debug subscriber connected", self.name);
                        self.subscriber = Some(stream);
                    }
                    Err(e) => log::warn!("{}: debug subscriber setup failed: {}", self.name, e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => log::debug!("{}: debug accept failed: {}", self.name, e),
        }
    }

    /// True if a subscriber is (now) connected.
    pub fn is_connected(&mut self) -> bool {
        self.accept();
        self.subscriber.is_some()
    }

    /// Send one frame to the subscriber, if any. Returns whether it was sent.
    pub fn push_frame(&mut self, frame: &[u8], attachment: Option<&DebugAttachment>) -> bool {
        if !self.is_connected() {
            return false;
        }
        let header = json!({
            "width": self.width,
            "height": self.height,
            "size": frame.len(),
            "attachment": attachment.map(DebugAttachment::to_json),
        });

        let Some(subscriber) = self.subscriber.as_mut() else {
            return false;
        };
        let sent = writeln!(subscriber, "{}", header).and_then(|_| subscriber.write_all(frame));
        match sent {
            Ok(()) => {
                self.frames_sent += 1;
                true
            }
            Err(e) => {
                log::info!("{}: debug subscriber disconnected: {}", self.name, e);
                self.subscriber = None;
                false
            }
        }
    }
}

impl Drop for DebugStream {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        self.in_use.lock().unwrap_or_else(|e| e.into_inner())[self.index] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};

    fn sample(time: u64) -> ImuSample {
        ImuSample {
            time,
            angular_velocity: [0.0; 3],
            acceleration: [0.0, 0.0, 9.81],
        }
    }

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vrtrackd-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn socket_config(dir: &Path) -> TrackdConfig {
        TrackdConfig {
            debug: DebugMode::Socket,
            debug_dir: dir.to_path_buf(),
            ..TrackdConfig::default()
        }
    }

    #[test]
    fn test_imu_history_keeps_latest() {
        let history = ImuHistory::new();
        for t in 0..40 {
            history.push(sample(t));
        }
        assert_eq!(history.len(), IMU_HISTORY_CAPACITY);
        let drained = history.drain();
        assert_eq!(drained.first().map(|s| s.time), Some(8));
        assert_eq!(drained.last().map(|s| s.time), Some(39));
        assert!(history.is_empty());
    }

    #[test]
    fn test_attachment_caps_timestamps() {
        let mut attachment = DebugAttachment::new();
        assert!(attachment.push_timestamp(1));
        assert!(attachment.push_timestamp(2));
        assert!(attachment.push_timestamp(3));
        assert!(!attachment.push_timestamp(4));
        assert_eq!(attachment.timestamps(), &[1, 2, 3]);
    }

    #[test]
    fn test_disabled_sink_opens_nothing() {
        let sink = DebugSink::disabled();
        assert!(sink.open_stream("cam", 752, 480).unwrap().is_none());
    }

    #[test]
    fn test_stale_sockets_removed_and_indices_allocated() {
        let dir = test_dir("debug-alloc");
        std::fs::write(dir.join("vrtrackd-debug-0"), b"stale").unwrap();

        let sink = DebugSink::new(&socket_config(&dir));
        assert!(!dir.join("vrtrackd-debug-0").exists());

        let first = sink.open_stream("cam0", 4, 2).unwrap().unwrap();
        let second = sink.open_stream("cam1", 4, 2).unwrap().unwrap();
        assert_eq!(first.path(), dir.join("vrtrackd-debug-0"));
        assert_eq!(second.path(), dir.join("vrtrackd-debug-1"));

        drop(first);
        let third = sink.open_stream("cam2", 4, 2).unwrap().unwrap();
        assert_eq!(third.path(), dir.join("vrtrackd-debug-0"));

        drop(second);
        drop(third);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_push_only_while_connected() {
        let dir = test_dir("debug-push");
        let sink = DebugSink::new(&socket_config(&dir));
        let mut stream = sink.open_stream("cam", 4, 2).unwrap().unwrap();
        let frame = [1u8, 2, 3, 4, 5, 6, 7, 8];

        assert!(!stream.push_frame(&frame, None));

        let client = UnixStream::connect(stream.path()).unwrap();
        let mut attachment = DebugAttachment::new();
        attachment.imu.push(sample(7));
        attachment.push_timestamp(99);
        assert!(stream.push_frame(&frame, Some(&attachment)));
        assert_eq!(stream.frames_sent(), 1);

        let mut reader = BufReader::new(client);
        let mut header = String::new();
        reader.read_line(&mut header).unwrap();
        let header: serde_json::Value = serde_json::from_str(&header).unwrap();
        assert_eq!(header["size"], 8);
        assert_eq!(header["attachment"]["imu"][0]["time"], 7);
        assert_eq!(header["attachment"]["timestamps"][0], 99);
        let mut payload = [0u8; 8];
        reader.read_exact(&mut payload).unwrap();
        assert_eq!(payload, frame);

        drop(stream);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
