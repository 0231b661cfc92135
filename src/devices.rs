//! Support for 1Wire devices in the DS18 family of temperature sensors.
//!
//! | Device      | Code | Notes                                     |
//! | ----------- | ---- | ----------------------------------------- |
//! | DS18S20     |  10  | fixed 9-bit, no configuration register    |
//! | DS18S20-PAR |  10  |                                           |
//! | DS18B20     |  28  | what the ASCD battery probes carry        |
//! | MAX31820    |  28  |                                           |
//! | MAX31820PAR |  28  |                                           |
//! | DS1825      |  3b  |                                           |
//! | MAX31825    |  3b  |                                           |
//! | MAX31850    |  3b  |                                           |
//! | MAX31826    |  3b  |                                           |
//! | DS28EA00    |  42  | CHAIN and GPIO are not used               |
//! | MAX30207    |  54  |                                           |
//! | MAX31888    |  54  |                                           |

use crate::onewire::crc8;

pub const FAMILY_DS18S20: u8 = 0x10;
pub const FAMILY_DS18B20: u8 = 0x28;
pub const FAMILY_DS1825: u8 = 0x3b;
pub const FAMILY_DS28EA00: u8 = 0x42;
pub const FAMILY_MAX30207: u8 = 0x54;

/// What a failed read reports instead of a temperature. Same value the
/// Arduino DallasTemperature library uses, so tables and logs line up.
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;

/// Datasheet measuring range of the DS18B20.
pub const MIN_VALID_C: f32 = -55.0;
pub const MAX_VALID_C: f32 = 125.0;

/// True when `celsius` is a plausible measurement rather than the
/// disconnected sentinel or something out of the sensor's range.
pub fn is_valid_reading(celsius: f32) -> bool {
    (MIN_VALID_C..=MAX_VALID_C).contains(&celsius)
}

/// Temperature sensor families, grouped by family code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TemperatureSensorFamily {
    OneZero,
    TwoEight,
    ThreeBravo,
    FourTwo,
    FiveFour,
}

impl TemperatureSensorFamily {
    pub fn from_code(code: u8) -> Option<TemperatureSensorFamily> {
        match code {
            FAMILY_DS18S20 => Some(TemperatureSensorFamily::OneZero),
            FAMILY_DS18B20 => Some(TemperatureSensorFamily::TwoEight),
            FAMILY_DS1825 => Some(TemperatureSensorFamily::ThreeBravo),
            FAMILY_DS28EA00 => Some(TemperatureSensorFamily::FourTwo),
            FAMILY_MAX30207 => Some(TemperatureSensorFamily::FiveFour),
            _ => None,
        }
    }

    /// Whether the device has a resolution field in its configuration
    /// register.
    pub fn has_config_register(&self) -> bool {
        !matches!(self, TemperatureSensorFamily::OneZero)
    }
}

/// Function commands for DS18 devices, sent after a ROM command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DsCommand {
    ConvertT = 0x44,
    WriteScratchpad = 0x4e,
    ReadScratchpad = 0xbe,
}

/// Reporting precision. Not all precisions are available at all devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Precision {
    Nine,
    Ten,
    Eleven,
    Twelve,
}

impl Precision {
    pub fn bits(&self) -> u8 {
        match self {
            Precision::Nine => 9,
            Precision::Ten => 10,
            Precision::Eleven => 11,
            Precision::Twelve => 12,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Precision> {
        match bits {
            9 => Some(Precision::Nine),
            10 => Some(Precision::Ten),
            11 => Some(Precision::Eleven),
            12 => Some(Precision::Twelve),
            _ => None,
        }
    }

    /// Configuration register byte: R1:R0 in bits 6:5, the rest reads as 1s.
    pub fn config_register(&self) -> u8 {
        ((self.bits() - 9) << 5) | 0x1f
    }

    pub fn from_config_register(reg: u8) -> Precision {
        match (reg >> 5) & 0b11 {
            0 => Precision::Nine,
            1 => Precision::Ten,
            2 => Precision::Eleven,
            _ => Precision::Twelve,
        }
    }

    /// Worst-case conversion time in milliseconds, or `None` when the
    /// family's datasheet gives nothing for this precision.
    pub fn t_conv_ms(&self, family: TemperatureSensorFamily) -> Option<u32> {
        match family {
            TemperatureSensorFamily::OneZero => Some(750),
            TemperatureSensorFamily::TwoEight | TemperatureSensorFamily::ThreeBravo => {
                Some(match self {
                    Precision::Nine => 94,
                    Precision::Ten => 188,
                    Precision::Eleven => 375,
                    Precision::Twelve => 750,
                })
            }
            // many more to look up; the driver polls the slow ones at 750ms
            _ => None,
        }
    }
}

/// The nine scratchpad bytes as read back from a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scratchpad(pub [u8; 9]);

impl Scratchpad {
    /// CRC checks out and the bytes aren't a floating (all ones) or shorted
    /// (all zeros) bus.
    pub fn is_valid(&self) -> bool {
        let b = &self.0;
        crc8(b) == 0 && b.iter().any(|x| *x != 0xff) && b.iter().any(|x| *x != 0)
    }

    pub fn raw_temperature(&self) -> i16 {
        i16::from_le_bytes([self.0[0], self.0[1]])
    }

    pub fn th(&self) -> u8 {
        self.0[2]
    }

    pub fn tl(&self) -> u8 {
        self.0[3]
    }

    pub fn config(&self) -> u8 {
        self.0[4]
    }

    /// Temperature in Celsius. The DS18S20 counts half degrees, everything
    /// else sixteenths.
    pub fn celsius(&self, family: TemperatureSensorFamily) -> f32 {
        let raw = self.raw_temperature() as f32;
        match family {
            TemperatureSensorFamily::OneZero => raw / 2.0,
            _ => raw / 16.0,
        }
    }
}
