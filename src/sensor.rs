//! The sensors found on the bus and which slot each one ended up in.

use heapless::Vec;

use crate::bus::MAX_SENSORS;
use crate::onewire::RomId;

/// One device on the bus. The address never changes; the slot is set once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sensor {
    address: RomId,
    assigned_to: Option<usize>,
}

impl Sensor {
    pub const fn new(address: RomId) -> Self {
        Self {
            address,
            assigned_to: None,
        }
    }

    pub fn address(&self) -> &RomId {
        &self.address
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }

    /// Logical slot this sensor was assigned to, if any.
    pub fn assigned_to(&self) -> Option<usize> {
        self.assigned_to
    }
}

/// The sensors in bus-scan order. Position in the set is the "physical
/// index" the assignment table refers to. Fixed once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorSet {
    sensors: Vec<Sensor, MAX_SENSORS>,
}

impl SensorSet {
    pub fn from_addresses(addresses: &[RomId]) -> Option<Self> {
        let mut sensors = Vec::new();
        for a in addresses {
            sensors.push(Sensor::new(*a)).ok()?;
        }
        Some(Self { sensors })
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sensor> {
        self.sensors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter()
    }

    /// `(physical index, sensor)` for every sensor not yet in a slot.
    pub fn unassigned(&self) -> impl Iterator<Item = (usize, &Sensor)> {
        self.sensors
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_assigned())
    }

    pub fn unassigned_count(&self) -> usize {
        self.unassigned().count()
    }

    /// Record that sensor `index` now belongs to `slot`. Returns false if the
    /// index is out of range or the sensor was already assigned.
    pub(crate) fn mark_assigned(&mut self, index: usize, slot: usize) -> bool {
        match self.sensors.get_mut(index) {
            Some(s) if !s.is_assigned() => {
                s.assigned_to = Some(slot);
                true
            }
            _ => false,
        }
    }
}
