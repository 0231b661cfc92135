//! Slot -> sensor assignment table and its copy-pasteable literal form.

use core::fmt;

use heapless::Vec;

use crate::bus::MAX_SENSORS;
use crate::error::TableError;
use crate::onewire::{RomHex, RomId};
use crate::sensor::SensorSet;

/// Maps each logical slot to a physical index in the [`SensorSet`]. The
/// last slot is the ambient (residual) one. A physical index appears at most
/// once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignmentTable {
    slots: Vec<Option<usize>, MAX_SENSORS>,
}

impl AssignmentTable {
    /// Empty table with `len` slots (clamped to [`MAX_SENSORS`]).
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::new();
        for _ in 0..len.min(MAX_SENSORS) {
            let _ = slots.push(None);
        }
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the ambient slot.
    pub fn residual_slot(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    pub fn get(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn is_assigned(&self, slot: usize) -> bool {
        self.get(slot).is_some()
    }

    pub fn assign(&mut self, slot: usize, sensor: usize) -> Result<(), TableError> {
        if self.slots.iter().any(|s| *s == Some(sensor)) {
            return Err(TableError::SensorTaken { sensor });
        }
        match self.slots.get_mut(slot) {
            None => Err(TableError::SlotOutOfRange { slot }),
            Some(Some(_)) => Err(TableError::SlotTaken { slot }),
            Some(s) => {
                *s = Some(sensor);
                Ok(())
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Physical indexes in slot order. Only meaningful once complete.
    pub fn order(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.slots.iter().copied()
    }

    /// The addresses in slot order, ready to print.
    pub fn literal<'a>(&self, sensors: &'a SensorSet) -> Result<TableLiteral<'a>, TableError> {
        if !self.is_complete() {
            return Err(TableError::Incomplete);
        }
        let mut addresses = Vec::new();
        for slot in self.slots.iter().flatten() {
            let sensor = sensors
                .get(*slot)
                .ok_or(TableError::SensorOutOfRange { sensor: *slot })?;
            let _ = addresses.push(sensor.address());
        }
        Ok(TableLiteral { addresses })
    }
}

/// The finished table as a C `DeviceAddress` initializer, e.g.
///
/// ```text
/// DeviceAddress tempSensorSerial[5] = {
///   {0x28, 0x55, 0xE9, 0x79, 0x97, 0x05, 0x03, 0x86},
///   ...
///   {0x28, 0xC8, 0x9C, 0x79, 0x97, 0x05, 0x03, 0xC2}
/// };
/// ```
pub struct TableLiteral<'a> {
    addresses: Vec<&'a RomId, MAX_SENSORS>,
}

impl<'a> TableLiteral<'a> {
    pub fn addresses(&self) -> &[&'a RomId] {
        &self.addresses
    }

    /// One printable line at a time, so a console can send it line by line.
    pub fn lines(&self) -> impl Iterator<Item = LiteralLine<'a>> + '_ {
        let n = self.addresses.len();
        core::iter::once(LiteralLine::Open { count: n })
            .chain(
                self.addresses
                    .iter()
                    .enumerate()
                    .map(move |(i, a)| LiteralLine::Entry {
                        address: *a,
                        last: i + 1 == n,
                    }),
            )
            .chain(core::iter::once(LiteralLine::Close))
    }
}

impl fmt::Display for TableLiteral<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub enum LiteralLine<'a> {
    Open { count: usize },
    Entry { address: &'a RomId, last: bool },
    Close,
}

impl fmt::Display for LiteralLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralLine::Open { count } => {
                write!(f, "DeviceAddress tempSensorSerial[{}] = {{", count)
            }
            LiteralLine::Entry { address, last } => {
                write!(f, "  {{{}}}{}", RomHex(*address), if *last { "" } else { "," })
            }
            LiteralLine::Close => f.write_str("};"),
        }
    }
}
