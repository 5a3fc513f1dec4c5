//! Configuration JSON stored in the headset.
//!
//! The blob is read out over feature reports, zlib-inflated, and parsed
//! with `serde_json`. Identity fields are compared against expectations
//! and mismatches only warned about.

use crate::imu::ImuCalibration;
use crate::protocol::{
    self, CONFIG_READ_REPORT_ID, CONFIG_REPORT_SIZE, CONFIG_START_REPORT_ID, PID_VIVE_HEADSET,
    VID_VALVE,
};
use crate::transport::ReportChannel;
use crate::types::{LighthouseModel, LighthousePoint};
use crate::{Result, TrackdError};
use flate2::read::ZlibDecoder;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Read;

/// Upper bound on the compressed blob; real headsets store a few KiB.
const MAX_COMPRESSED_SIZE: usize = 64 * 1024;

/// Download the compressed configuration blob and inflate it to JSON text.
pub fn read_config_json(channel: &mut dyn ReportChannel) -> Result<String> {
    let mut buf = [0u8; CONFIG_REPORT_SIZE];
    buf[0] = CONFIG_START_REPORT_ID;
    channel.get_feature_report(&mut buf)?;

    let mut compressed = Vec::new();
    loop {
        let mut buf = [0u8; CONFIG_REPORT_SIZE];
        buf[0] = CONFIG_READ_REPORT_ID;
        let n = channel.get_feature_report(&mut buf)?;
        let chunk = protocol::parse_config_chunk(&buf[..n])?;
        if chunk.is_empty() {
            break;
        }
        compressed.extend_from_slice(chunk);
        if compressed.len() > MAX_COMPRESSED_SIZE {
            return Err(TrackdError::Config(format!(
                "configuration exceeds {} bytes",
                MAX_COMPRESSED_SIZE
            )));
        }
    }

    let mut text = String::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .map_err(|e| TrackdError::Config(format!("inflating configuration failed: {}", e)))?;
    Ok(text)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LighthouseConfig {
    #[serde(default)]
    model_points: Vec<[f64; 3]>,
    #[serde(default)]
    model_normals: Vec<[f64; 3]>,
    #[serde(default)]
    channel_map: Vec<u32>,
}

impl From<LighthouseConfig> for LighthouseModel {
    fn from(config: LighthouseConfig) -> Self {
        let points = config
            .model_points
            .iter()
            .enumerate()
            .map(|(i, &position)| LighthousePoint {
                position,
                normal: config.model_normals.get(i).copied().unwrap_or([0.0; 3]),
            })
            .collect();
        LighthouseModel {
            points,
            channel_map: config.channel_map,
        }
    }
}

/// Identity fields as found in the configuration. Each one may be absent
/// or of the wrong type; that is reported, never papered over.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIdentity {
    pub device_class: Result<String, FieldError>,
    pub device_vid: Result<i64, FieldError>,
    pub device_pid: Result<i64, FieldError>,
    pub serial: Result<String, FieldError>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("missing field \"{0}\"")]
    Missing(&'static str),
    #[error("field \"{0}\" has the wrong type")]
    WrongType(&'static str),
}

fn field<'a>(object: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, FieldError> {
    object.get(name).ok_or(FieldError::Missing(name))
}

fn get_string(object: &Map<String, Value>, name: &'static str) -> Result<String, FieldError> {
    field(object, name)?
        .as_str()
        .map(str::to_string)
        .ok_or(FieldError::WrongType(name))
}

fn get_int(object: &Map<String, Value>, name: &'static str) -> Result<i64, FieldError> {
    field(object, name)?.as_i64().ok_or(FieldError::WrongType(name))
}

fn get_vec3(object: &Map<String, Value>, name: &'static str) -> Result<[f64; 3], FieldError> {
    let array = field(object, name)?
        .as_array()
        .filter(|a| a.len() == 3)
        .ok_or(FieldError::WrongType(name))?;
    let mut out = [0.0; 3];
    for (v, slot) in array.iter().zip(out.iter_mut()) {
        *slot = v.as_f64().ok_or(FieldError::WrongType(name))?;
    }
    Ok(out)
}

/// Parsed headset configuration.
#[derive(Debug, Clone)]
pub struct HeadsetConfig {
    pub imu: ImuCalibration,
    pub identity: ConfigIdentity,
    pub model: LighthouseModel,
}

impl HeadsetConfig {
    /// Parse the JSON text. Only malformed JSON is an error; missing IMU
    /// vectors keep their neutral defaults and are logged by the caller via
    /// `warnings`.
    pub fn parse(text: &str) -> Result<(HeadsetConfig, Vec<String>)> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TrackdError::Config(format!("Parsing JSON configuration data failed: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| TrackdError::Config("configuration is not a JSON object".into()))?;

        let mut warnings = Vec::new();
        let defaults = ImuCalibration::default();
        let mut vec3_or = |name: &'static str, default: [f64; 3]| match get_vec3(object, name) {
            Ok(v) => v,
            Err(e) => {
                warnings.push(e.to_string());
                default
            }
        };
        let imu = ImuCalibration {
            acc_bias: vec3_or("acc_bias", defaults.acc_bias),
            acc_scale: vec3_or("acc_scale", defaults.acc_scale),
            gyro_bias: vec3_or("gyro_bias", defaults.gyro_bias),
            gyro_scale: vec3_or("gyro_scale", defaults.gyro_scale),
        };

        let model = match object.get("lighthouse_config") {
            Some(v) => match LighthouseConfig::deserialize(v) {
                Ok(config) => config.into(),
                Err(e) => {
                    warnings.push(format!("lighthouse_config: {}", e));
                    LighthouseModel::default()
                }
            },
            None => LighthouseModel::default(),
        };

        let identity = ConfigIdentity {
            device_class: get_string(object, "device_class"),
            device_vid: get_int(object, "device_vid"),
            device_pid: get_int(object, "device_pid"),
            serial: get_string(object, "device_serial_number"),
        };

        Ok((
            HeadsetConfig {
                imu,
                identity,
                model,
            },
            warnings,
        ))
    }

    /// Compare identity fields against what this headset should report.
    /// Returns human readable findings; an empty list means everything matched.
    pub fn check_identity(&self, expected_serial: Option<&str>) -> Vec<String> {
        let mut findings = Vec::new();
        let id = &self.identity;

        match &id.device_class {
            Ok(class) if class == "hmd" => {}
            Ok(class) => findings.push(format!("Unknown device class \"{}\"", class)),
            Err(e) => findings.push(e.to_string()),
        }
        match id.device_pid {
            Ok(pid) if pid == i64::from(PID_VIVE_HEADSET) => {}
            Ok(pid) => findings.push(format!("Unknown device PID: 0x{:04x}", pid)),
            Err(ref e) => findings.push(e.to_string()),
        }
        match (&id.serial, expected_serial) {
            (Ok(serial), Some(expected)) if serial != expected => {
                findings.push(format!("Configuration serial number differs: {}", serial))
            }
            (Ok(_), _) => {}
            (Err(e), _) => findings.push(e.to_string()),
        }
        match id.device_vid {
            Ok(vid) if vid == i64::from(VID_VALVE) => {}
            Ok(vid) => findings.push(format!("Unknown device VID: 0x{:04x}", vid)),
            Err(ref e) => findings.push(e.to_string()),
        }
        findings
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::mock::MockChannel;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) const SAMPLE_CONFIG: &str = r#"{
        "acc_bias": [0.1, -0.2, 0.3],
        "acc_scale": [1.0, 1.01, 0.99],
        "gyro_bias": [0.0, 0.0, 0.01],
        "gyro_scale": [1.0, 1.0, 1.0],
        "device_class": "hmd",
        "device_pid": 8192,
        "device_vid": 10462,
        "device_serial_number": "LHR-12345678",
        "lighthouse_config": {
            "channelMap": [0, 1],
            "modelNormals": [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0]],
            "modelPoints": [[0.01, 0.02, 0.03], [0.04, 0.05, 0.06]]
        }
    }"#;

    /// Queue the feature reports a headset sends for `json`.
    pub(crate) fn queue_config(channel: &MockChannel, json: &str) {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut start = vec![0u8; CONFIG_REPORT_SIZE];
        start[0] = CONFIG_START_REPORT_ID;
        channel.queue_feature(start);
        for chunk in compressed.chunks(62) {
            let mut report = vec![0u8; CONFIG_REPORT_SIZE];
            report[0] = CONFIG_READ_REPORT_ID;
            report[1] = chunk.len() as u8;
            report[2..2 + chunk.len()].copy_from_slice(chunk);
            channel.queue_feature(report);
        }
        let mut end = vec![0u8; CONFIG_REPORT_SIZE];
        end[0] = CONFIG_READ_REPORT_ID;
        channel.queue_feature(end);
    }

    #[test]
    fn test_read_config_json_inflates_chunks() {
        let mut channel = MockChannel::new();
        queue_config(&channel, SAMPLE_CONFIG);
        let text = read_config_json(&mut channel).unwrap();
        assert_eq!(text, SAMPLE_CONFIG);
        assert_eq!(channel.feature_requests()[0], CONFIG_START_REPORT_ID);
    }

    #[test]
    fn test_parse_sample_config() {
        let (config, warnings) = HeadsetConfig::parse(SAMPLE_CONFIG).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.imu.acc_bias, [0.1, -0.2, 0.3]);
        assert_eq!(config.imu.gyro_bias, [0.0, 0.0, 0.01]);
        assert_eq!(config.model.points.len(), 2);
        assert_eq!(config.model.points[1].normal, [0.0, 1.0, 0.0]);
        assert_eq!(config.model.channel_map, vec![0, 1]);
        assert!(config.check_identity(Some("LHR-12345678")).is_empty());
    }

    #[test]
    fn test_identity_mismatch_is_reported_not_fatal() {
        let json = r#"{"device_class": "controller", "device_pid": "8192", "device_vid": 10462,
                       "device_serial_number": "LHR-0"}"#;
        let (config, warnings) = HeadsetConfig::parse(json).unwrap();
        // acc/gyro vectors are all missing
        assert_eq!(warnings.len(), 4);
        assert_eq!(config.imu, ImuCalibration::default());
        assert!(!config.model.is_valid());

        let findings = config.check_identity(Some("LHR-1"));
        assert_eq!(
            findings,
            vec![
                "Unknown device class \"controller\"".to_string(),
                "field \"device_pid\" has the wrong type".to_string(),
                "Configuration serial number differs: LHR-0".to_string(),
            ]
        );
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            HeadsetConfig::parse("{\"acc_bias\": [1, 2"),
            Err(TrackdError::Config(_))
        ));
    }
}
