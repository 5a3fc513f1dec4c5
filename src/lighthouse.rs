use crate::error::ProtocolError;
use crate::protocol::{self, PulseSlot, MAX_SENSOR_ID, SENSOR_ID_UNUSED, SENSOR_ID_VSYNC};
use crate::types::{LighthouseModel, PulseEvent};

/// Output of decoding one pulse slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LighthouseEvent {
    Pulse(PulseEvent),
    Vsync(u32),
}

/// Decode pulse slots, calling `emit` for each pulse or vsync marker.
///
/// The receiver fills slots in detection order, so slot index says nothing
/// about the sensor. Unused slots (0xff) are skipped. An id above 31 stops
/// decoding of the remaining slots and is returned as an error; events
/// emitted before it stand.
pub fn decode_slots(
    slots: &[PulseSlot],
    mut emit: impl FnMut(LighthouseEvent),
) -> Result<(), ProtocolError> {
    for slot in slots {
        match slot.id {
            SENSOR_ID_UNUSED => continue,
            SENSOR_ID_VSYNC => emit(LighthouseEvent::Vsync(slot.timestamp)),
            id if id > MAX_SENSOR_ID => return Err(ProtocolError::UnknownSensorId(id)),
            id => emit(LighthouseEvent::Pulse(PulseEvent {
                sensor_id: id,
                duration: slot.duration,
                timestamp: slot.timestamp,
            })),
        }
    }
    Ok(())
}

/// Per-headset lighthouse receiver state.
#[derive(Debug, Default)]
pub struct Watchman {
    pub model: LighthouseModel,
    /// Timestamp of the most recent vsync marker, anchoring downstream timing.
    last_vsync: Option<u32>,
    pulses: u64,
}

impl Watchman {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_vsync(&self) -> Option<u32> {
        self.last_vsync
    }

    /// Total spatial pulses seen since creation.
    pub fn pulse_count(&self) -> u64 {
        self.pulses
    }

    /// Decode a complete 64-byte pulse report.
    pub fn decode_report(
        &mut self,
        data: &[u8],
        mut emit: impl FnMut(LighthouseEvent),
    ) -> Result<(), ProtocolError> {
        let slots = protocol::parse_pulse_report(data)?;
        decode_slots(&slots, |event| {
            match event {
                LighthouseEvent::Vsync(ts) => self.last_vsync = Some(ts),
                LighthouseEvent::Pulse(_) => self.pulses += 1,
            }
            emit(event);
        })
    }
}
