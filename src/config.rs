use std::path::PathBuf;
use std::time::Duration;

/// Which debug output, if any, devices publish their frames to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    Off,
    /// Unix-socket stream per device.
    Socket,
    /// Shared-memory transport; accepted for compatibility, served over the socket path.
    Shm,
}

impl DebugMode {
    pub fn enabled(self) -> bool {
        self != DebugMode::Off
    }
}

/// Runtime settings, collected once at startup and passed by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackdConfig {
    pub poll_timeout: Duration,
    pub event_capacity: usize,
    /// Enable DK2 exposure sync when the camera starts.
    pub camera_sync: bool,
    pub debug: DebugMode,
    pub debug_dir: PathBuf,
}

impl Default for TrackdConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            event_capacity: 1024,
            camera_sync: false,
            debug: DebugMode::Off,
            debug_dir: PathBuf::from("/tmp"),
        }
    }
}

impl TrackdConfig {
    /// Read `VRTRACKD_*` environment variables, falling back to defaults for
    /// anything missing or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let poll_ms = read_u64(&lookup, "VRTRACKD_POLL_TIMEOUT_MS")
            .filter(|&ms| ms > 0)
            .unwrap_or(defaults.poll_timeout.as_millis() as u64);
        let event_capacity = read_u64(&lookup, "VRTRACKD_EVENT_CAPACITY")
            .filter(|&n| n > 0)
            .map(|n| n as usize)
            .unwrap_or(defaults.event_capacity);
        let camera_sync = read_bool(&lookup, "VRTRACKD_CAMERA_SYNC", defaults.camera_sync);

        let debug = match read_string(&lookup, "VRTRACKD_DEBUG", "off").as_str() {
            "off" | "0" | "none" => DebugMode::Off,
            "socket" | "1" | "on" => DebugMode::Socket,
            "shm" => DebugMode::Shm,
            other => {
                log::warn!(
                    "Unknown VRTRACKD_DEBUG='{}', debug output disabled (supported: off|socket|shm)",
                    other
                );
                DebugMode::Off
            }
        };
        let debug_dir = lookup("VRTRACKD_DEBUG_DIR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.debug_dir);

        Self {
            poll_timeout: Duration::from_millis(poll_ms),
            event_capacity,
            camera_sync,
            debug,
            debug_dir,
        }
    }
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    lookup(name).and_then(|v| v.trim().parse::<u64>().ok())
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> TrackdConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TrackdConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(config(&[]), TrackdConfig::default());
        assert_eq!(TrackdConfig::default().poll_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_values_are_parsed_leniently() {
        let c = config(&[
            ("VRTRACKD_POLL_TIMEOUT_MS", " 250 "),
            ("VRTRACKD_EVENT_CAPACITY", "16"),
            ("VRTRACKD_CAMERA_SYNC", "Yes"),
            ("VRTRACKD_DEBUG", "SOCKET"),
            ("VRTRACKD_DEBUG_DIR", "/run/vrtrackd"),
        ]);
        assert_eq!(c.poll_timeout, Duration::from_millis(250));
        assert_eq!(c.event_capacity, 16);
        assert!(c.camera_sync);
        assert_eq!(c.debug, DebugMode::Socket);
        assert_eq!(c.debug_dir, PathBuf::from("/run/vrtrackd"));
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let c = config(&[
            ("VRTRACKD_POLL_TIMEOUT_MS", "0"),
            ("VRTRACKD_EVENT_CAPACITY", "lots"),
            ("VRTRACKD_CAMERA_SYNC", "maybe"),
            ("VRTRACKD_DEBUG", "vnc"),
        ]);
        assert_eq!(c, TrackdConfig::default());
    }
}
