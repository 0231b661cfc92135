//! Error types shared by the bus, console and identification layers.

use core::fmt;

/// Failures on the 1Wire bus itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// No device answered the reset pulse
    NoPresence,
    /// More devices answered a search than we have room to track
    TooManyDevices,
    /// Scratchpad or ROM failed its CRC
    Crc,
    /// The bus master didn't finish an operation in time
    Timeout,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::NoPresence => f.write_str("no presence pulse on the sensor bus"),
            BusError::TooManyDevices => f.write_str("too many devices on the sensor bus"),
            BusError::Crc => f.write_str("CRC mismatch reading from the sensor bus"),
            BusError::Timeout => f.write_str("sensor bus operation timed out"),
        }
    }
}

/// Failures talking to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsoleError {
    /// Output could not be delivered
    WriteFailed,
    /// Input could not be read
    ReadFailed,
    /// A formatted line didn't fit the line buffer
    LineTooLong,
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::WriteFailed => f.write_str("console write failed"),
            ConsoleError::ReadFailed => f.write_str("console read failed"),
            ConsoleError::LineTooLong => f.write_str("console line too long"),
        }
    }
}

/// Misuse of the slot -> sensor assignment table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableError {
    /// Slot index past the end of the table
    SlotOutOfRange { slot: usize },
    /// Sensor index past the end of the sensor set
    SensorOutOfRange { sensor: usize },
    /// Slot already holds a sensor
    SlotTaken { slot: usize },
    /// Sensor already sits in another slot
    SensorTaken { sensor: usize },
    /// Emission asked for before every slot was filled
    Incomplete,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::SlotOutOfRange { slot } => write!(f, "slot {} out of range", slot),
            TableError::SensorOutOfRange { sensor } => write!(f, "sensor {} out of range", sensor),
            TableError::SlotTaken { slot } => write!(f, "slot {} already assigned", slot),
            TableError::SensorTaken { sensor } => {
                write!(f, "sensor {} already assigned to a slot", sensor)
            }
            TableError::Incomplete => f.write_str("assignment table incomplete"),
        }
    }
}

/// Everything that stops the identification procedure.
///
/// `PopulationMismatch`, `AddressReadIncomplete` and `ResidualInconsistent`
/// are the procedure's own fatal conditions; the rest come from the
/// collaborators or from the opt-in guards in [`crate::IdentifyConfig`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdentifyError {
    /// Neither the family-filtered enumeration nor the raw scan found the
    /// expected number of devices
    PopulationMismatch {
        primary: usize,
        raw: usize,
        expected: usize,
    },
    /// The count matched but the address scan came up short
    AddressReadIncomplete { found: usize, expected: usize },
    /// The residual slot expects exactly one unassigned sensor
    ResidualInconsistent { unassigned: usize },
    /// Every reading in a baseline pass was rejected as invalid
    NoValidReadings,
    /// `max_polls_per_slot` ran out before anything warmed up
    SlotTimeout { slot: usize },
    /// Configuration failed validation
    InvalidConfig,
    Bus(BusError),
    Console(ConsoleError),
    Table(TableError),
}

impl From<BusError> for IdentifyError {
    fn from(e: BusError) -> Self {
        IdentifyError::Bus(e)
    }
}

impl From<ConsoleError> for IdentifyError {
    fn from(e: ConsoleError) -> Self {
        IdentifyError::Console(e)
    }
}

impl From<TableError> for IdentifyError {
    fn from(e: TableError) -> Self {
        IdentifyError::Table(e)
    }
}

impl fmt::Display for IdentifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifyError::PopulationMismatch {
                primary,
                raw,
                expected,
            } => write!(
                f,
                "sensor count mismatch: expected {}, driver found {}, raw scan found {}",
                expected, primary, raw
            ),
            IdentifyError::AddressReadIncomplete { found, expected } => write!(
                f,
                "read {} of {} sensor addresses",
                found, expected
            ),
            IdentifyError::ResidualInconsistent { unassigned } => write!(
                f,
                "expected exactly one unassigned sensor for ambient, found {}",
                unassigned
            ),
            IdentifyError::NoValidReadings => f.write_str("no valid temperature readings"),
            IdentifyError::SlotTimeout { slot } => {
                write!(f, "no sensor warmed up for slot {}", slot)
            }
            IdentifyError::InvalidConfig => f.write_str("invalid identification config"),
            IdentifyError::Bus(e) => write!(f, "bus: {}", e),
            IdentifyError::Console(e) => write!(f, "console: {}", e),
            IdentifyError::Table(e) => write!(f, "table: {}", e),
        }
    }
}
