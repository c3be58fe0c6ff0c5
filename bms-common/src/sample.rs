//! Register frame layout and decoding.
//!
//! The BMS answers a read of input registers `0..7` with a fixed frame:
//!
//! ```text
//! index:  0    1    2    3    4        5     6
//!         V1   V2   V3   V4   current  T1    T2
//!         mV   mV   mV   mV   mA (i16) °C (i16)
//! ```

/// Number of input registers in one frame.
pub const REGISTER_COUNT: usize = 7;

/// Number of series-connected cells reported by the BMS.
pub const CELL_COUNT: usize = 4;

/// Number of temperature sensors reported by the BMS.
pub const TEMPERATURE_COUNT: usize = 2;

const CURRENT_INDEX: usize = CELL_COUNT;
const TEMPERATURE_START: usize = CURRENT_INDEX + 1;

/// Raw register words exactly as read from the device.
pub type RegisterFrame = [u16; REGISTER_COUNT];

/// Reinterpret an unsigned register word as a signed 16-bit value.
///
/// Values above `i16::MAX` wrap to `raw - 65536`.
pub fn unwrap_twos_complement(raw: u16) -> i16 {
    raw as i16
}

/// One decoded BMS reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedSample {
    /// Cell voltages in millivolts, cell 1 first.
    pub cell_voltages_mv: [u16; CELL_COUNT],
    /// Pack current in milliamps.
    pub current_ma: i16,
    /// Temperatures in degrees Celsius, sensor 1 first.
    pub temperatures_c: [i16; TEMPERATURE_COUNT],
}

impl DecodedSample {
    /// Encode this sample back into the register layout the device uses.
    pub fn to_frame(&self) -> RegisterFrame {
        let mut frame = [0u16; REGISTER_COUNT];
        frame[..CELL_COUNT].copy_from_slice(&self.cell_voltages_mv);
        frame[CURRENT_INDEX] = self.current_ma as u16;
        for (i, t) in self.temperatures_c.iter().enumerate() {
            frame[TEMPERATURE_START + i] = *t as u16;
        }
        frame
    }
}

/// Decode a raw register frame into physical values.
pub fn decode(frame: &RegisterFrame) -> DecodedSample {
    let mut cell_voltages_mv = [0u16; CELL_COUNT];
    cell_voltages_mv.copy_from_slice(&frame[..CELL_COUNT]);

    let mut temperatures_c = [0i16; TEMPERATURE_COUNT];
    for (i, t) in temperatures_c.iter_mut().enumerate() {
        *t = unwrap_twos_complement(frame[TEMPERATURE_START + i]);
    }

    DecodedSample {
        cell_voltages_mv,
        current_ma: unwrap_twos_complement(frame[CURRENT_INDEX]),
        temperatures_c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_matches_reference_rule() {
        for raw in 0..=u16::MAX {
            let expected = if raw <= 32767 {
                raw as i32
            } else {
                raw as i32 - 65536
            };
            assert_eq!(unwrap_twos_complement(raw) as i32, expected, "raw={}", raw);
        }
    }

    #[test]
    fn test_unwrap_boundaries() {
        assert_eq!(unwrap_twos_complement(0), 0);
        assert_eq!(unwrap_twos_complement(32767), 32767);
        assert_eq!(unwrap_twos_complement(32768), -32768);
        assert_eq!(unwrap_twos_complement(65535), -1);
    }

    #[test]
    fn test_decode_positive_frame() {
        let sample = decode(&[3300, 3310, 3295, 3298, 150, 250, 260]);

        assert_eq!(sample.cell_voltages_mv, [3300, 3310, 3295, 3298]);
        assert_eq!(sample.current_ma, 150);
        assert_eq!(sample.temperatures_c, [250, 260]);
    }

    #[test]
    fn test_decode_negative_current() {
        let sample = decode(&[3300, 3310, 3295, 3298, 65436, 250, 260]);
        assert_eq!(sample.current_ma, -100);
    }

    #[test]
    fn test_decode_negative_temperatures() {
        // -20 °C and -1 °C
        let sample = decode(&[3300, 3310, 3295, 3298, 0, 65516, 65535]);
        assert_eq!(sample.temperatures_c, [-20, -1]);
    }

    #[test]
    fn test_cell_voltages_stay_unsigned() {
        let sample = decode(&[40000, 0, 0, 0, 0, 0, 0]);
        assert_eq!(sample.cell_voltages_mv[0], 40000);
    }

    #[test]
    fn test_to_frame_restores_device_words() {
        let frame = [3400, 3410, 3395, 3405, 64536, 25, 65511];
        assert_eq!(decode(&frame).to_frame(), frame);
    }
}
