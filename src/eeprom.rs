//! Calibration and identity readout from the camera EEPROM.

use crate::esp570::EepromBus;
use crate::protocol::{
    self, EEPROM_BLOCK_SIZE, EEPROM_CALIBRATION_ADDR, EEPROM_CALIBRATION_SIZE, EEPROM_SERIAL_ADDR,
    EEPROM_SERIAL_LEN, EEPROM_VERSION_ADDR, EEPROM_VERSION_LEN,
};
use crate::types::CameraIntrinsics;
use crate::{Result, TrackdError};

/// Read `EEPROM_CALIBRATION_SIZE` bytes as consecutive 32-byte blocks.
///
/// Any failed or short block abandons the whole record.
pub fn read_calibration_record<B: EepromBus + ?Sized>(
    bus: &mut B,
) -> Result<[u8; EEPROM_CALIBRATION_SIZE]> {
    let mut record = [0u8; EEPROM_CALIBRATION_SIZE];
    for (i, block) in record.chunks_mut(EEPROM_BLOCK_SIZE).enumerate() {
        let addr = EEPROM_CALIBRATION_ADDR + (i * EEPROM_BLOCK_SIZE) as u16;
        let n = bus.eeprom_read(addr, block).map_err(|e| {
            TrackdError::CalibrationIncomplete(format!("block at 0x{:04x}: {}", addr, e))
        })?;
        if n != EEPROM_BLOCK_SIZE {
            return Err(TrackdError::CalibrationIncomplete(format!(
                "short read at 0x{:04x}: {} of {} bytes",
                addr, n, EEPROM_BLOCK_SIZE
            )));
        }
    }
    Ok(record)
}

/// Read and decode the camera intrinsics. All or nothing.
pub fn read_intrinsics<B: EepromBus + ?Sized>(bus: &mut B) -> Result<CameraIntrinsics> {
    let record = read_calibration_record(bus)?;
    Ok(protocol::parse_intrinsics(&record)?)
}

/// Read a fixed-length string field; `None` on a failed or short read.
fn read_string_field<B: EepromBus + ?Sized>(bus: &mut B, addr: u16, len: usize) -> Option<String> {
    let mut buf = vec![0u8; len];
    match bus.eeprom_read(addr, &mut buf) {
        Ok(n) if n == len => Some(protocol::extract_string(&buf)),
        Ok(n) => {
            log::debug!("EEPROM 0x{:04x}: short read ({} of {} bytes)", addr, n, len);
            None
        }
        Err(e) => {
            log::debug!("EEPROM 0x{:04x}: {}", addr, e);
            None
        }
    }
}

/// Firmware/hardware version string.
pub fn read_version<B: EepromBus + ?Sized>(bus: &mut B) -> Option<String> {
    read_string_field(bus, EEPROM_VERSION_ADDR, EEPROM_VERSION_LEN)
}

/// Device serial number.
pub fn read_serial<B: EepromBus + ?Sized>(bus: &mut B) -> Option<String> {
    read_string_field(bus, EEPROM_SERIAL_ADDR, EEPROM_SERIAL_LEN)
}
