//! Aptina MT9V034 image sensor setup over the bridge's I²C bus.
//!
//! The values below put the sensor into the mode used for LED tracking:
//! full 752x480 window, fixed short exposure and gain, no automatic
//! exposure control.

use crate::esp570::I2cBus;
use crate::Result;

/// 8-bit bus address as the bridge expects it.
pub const I2C_ADDR: u8 = 0x98;

pub mod reg {
    pub const COLUMN_START: u8 = 0x01;
    pub const ROW_START: u8 = 0x02;
    pub const WINDOW_HEIGHT: u8 = 0x03;
    pub const WINDOW_WIDTH: u8 = 0x04;
    pub const HORIZONTAL_BLANKING: u8 = 0x05;
    pub const VERTICAL_BLANKING: u8 = 0x06;
    pub const CHIP_CONTROL: u8 = 0x07;
    pub const COARSE_SHUTTER_WIDTH: u8 = 0x0B;
    pub const ANALOG_GAIN: u8 = 0x35;
    pub const AEC_AGC_ENABLE: u8 = 0xAF;
}

/// Chip control: progressive scan, master mode.
pub const CHIP_CONTROL_MASTER: u16 = 0x0388;
/// Chip control: progressive scan, snapshot mode triggered by the exposure pin.
pub const CHIP_CONTROL_SNAPSHOT: u16 = 0x0398;

const SETUP: &[(u8, u16)] = &[
    (reg::AEC_AGC_ENABLE, 0x0000),
    (reg::COLUMN_START, 1),
    (reg::ROW_START, 4),
    (reg::WINDOW_WIDTH, 752),
    (reg::WINDOW_HEIGHT, 480),
    (reg::HORIZONTAL_BLANKING, 94),
    (reg::VERTICAL_BLANKING, 45),
    (reg::COARSE_SHUTTER_WIDTH, 10),
    (reg::ANALOG_GAIN, 16),
];

/// Program the tracking mode. Stops at the first failed write.
pub fn sensor_setup<B: I2cBus + ?Sized>(bus: &mut B) -> Result<()> {
    for &(register, value) in SETUP {
        bus.i2c_write(I2C_ADDR, register, value)?;
    }
    Ok(())
}

/// Expose only when the headset's sync signal fires.
pub fn enable_sync<B: I2cBus + ?Sized>(bus: &mut B) -> Result<()> {
    bus.i2c_write(I2C_ADDR, reg::CHIP_CONTROL, CHIP_CONTROL_SNAPSHOT)
}

/// Free-running exposure.
pub fn disable_sync<B: I2cBus + ?Sized>(bus: &mut B) -> Result<()> {
    bus.i2c_write(I2C_ADDR, reg::CHIP_CONTROL, CHIP_CONTROL_MASTER)
}

pub fn set_sync<B: I2cBus + ?Sized>(bus: &mut B, sync: bool) -> Result<()> {
    if sync {
        enable_sync(bus)
    } else {
        disable_sync(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esp570::mock::MockBridge;

    #[test]
    fn test_setup_programs_full_window() {
        let mut bridge = MockBridge::default();
        sensor_setup(&mut bridge).unwrap();
        let writes = bridge.lock().writes.clone();
        assert_eq!(writes.len(), SETUP.len());
        assert!(writes.iter().all(|&(addr, _, _)| addr == I2C_ADDR));
        assert!(writes.contains(&(I2C_ADDR, reg::WINDOW_WIDTH, 752)));
        assert!(writes.contains(&(I2C_ADDR, reg::WINDOW_HEIGHT, 480)));
        // auto exposure goes off before anything else
        assert_eq!(writes[0], (I2C_ADDR, reg::AEC_AGC_ENABLE, 0));
    }

    #[test]
    fn test_setup_stops_at_failed_write() {
        let mut bridge = MockBridge::default();
        bridge.lock().fail_write_at = Some(2);
        assert!(sensor_setup(&mut bridge).is_err());
        assert_eq!(bridge.lock().writes.len(), 2);
    }

    #[test]
    fn test_sync_modes() {
        let mut bridge = MockBridge::default();
        set_sync(&mut bridge, true).unwrap();
        set_sync(&mut bridge, false).unwrap();
        assert_eq!(
            bridge.lock().writes,
            vec![
                (I2C_ADDR, reg::CHIP_CONTROL, CHIP_CONTROL_SNAPSHOT),
                (I2C_ADDR, reg::CHIP_CONTROL, CHIP_CONTROL_MASTER),
            ]
        );
    }
}
