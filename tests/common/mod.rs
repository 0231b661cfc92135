/*
 * Test doubles shared by the integration tests: a bus that replays scripted
 * temperatures, a console that records everything, and a delay that only
 * counts.
 */

#![allow(dead_code)]

use std::collections::VecDeque;

use ascd_sensor_identify::{
    BusError, Console, ConsoleError, Precision, RomId, SensorBus, DEVICE_DISCONNECTED_C,
    MAX_SENSORS,
};
use embedded_hal_async::delay::DelayNs;

pub const ROOM_C: f32 = 22.0;
pub const HOT_C: f32 = 25.0;

/// Five real DS18B20 ROM IDs, valid CRCs included.
pub fn roms() -> [RomId; 5] {
    [
        [0x28, 0x55, 0xE9, 0x79, 0x97, 0x05, 0x03, 0x86],
        [0x28, 0x90, 0x09, 0x79, 0x97, 0x02, 0x03, 0x46],
        [0x28, 0xCF, 0x2B, 0x79, 0x97, 0x05, 0x03, 0x59],
        [0x28, 0x4B, 0x6C, 0x79, 0x97, 0x04, 0x03, 0x13],
        [0x28, 0xC8, 0x9C, 0x79, 0x97, 0x05, 0x03, 0xC2],
    ]
}

/// `count` distinct DS18B20 addresses, e.g. for overfilling the bus.
pub fn many_roms(count: usize) -> Vec<RomId> {
    (0..count)
        .map(|i| [0x28, i as u8, 0x6C, 0x79, 0x97, 0x04, 0x03, 0x00])
        .collect()
}

/// Every sensor at room temperature, give or take a little noise.
pub fn room() -> Vec<f32> {
    vec![ROOM_C, 22.1, 22.0, 22.4, 22.2]
}

pub fn hot(index: usize) -> Vec<f32> {
    let mut frame = room();
    frame[index] = HOT_C;
    frame
}

/// Baseline at room temperature, then for each warmed probe one poll with it
/// hot and one re-baseline with everything back at room temperature.
pub fn warm_in_order(order: &[usize]) -> Vec<Vec<f32>> {
    let mut frames = vec![room()];
    for i in order {
        frames.push(hot(*i));
        frames.push(room());
    }
    frames
}

pub struct ScriptedBus {
    /// What the temperature driver reports
    pub primary: Vec<RomId>,
    /// What a raw ROM search reports. Temperatures are indexed by position
    /// in this list.
    pub raw: Vec<RomId>,
    /// Overrides what `raw_scan_count` reports, for a bus where the count
    /// and the address read disagree
    pub raw_count: Option<usize>,
    frames: VecDeque<Vec<f32>>,
    current: Vec<f32>,
    pub conversions: usize,
    /// Every address read, tagged with the conversion it followed
    pub reads: Vec<(usize, RomId)>,
    pub resolutions: Vec<(RomId, Precision)>,
}

impl ScriptedBus {
    pub fn new(roms: &[RomId]) -> Self {
        Self::with_scans(roms, roms)
    }

    pub fn with_scans(primary: &[RomId], raw: &[RomId]) -> Self {
        Self {
            primary: primary.to_vec(),
            raw: raw.to_vec(),
            raw_count: None,
            frames: VecDeque::new(),
            current: vec![ROOM_C; raw.len()],
            conversions: 0,
            reads: Vec::new(),
            resolutions: Vec::new(),
        }
    }

    /// One frame per upcoming conversion. After the last one, readings stay
    /// where they are.
    pub fn script(mut self, frames: Vec<Vec<f32>>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn with_raw_count(mut self, count: usize) -> Self {
        self.raw_count = Some(count);
        self
    }

    pub fn reads_after(&self, conversion: usize) -> Vec<RomId> {
        self.reads
            .iter()
            .filter(|(c, _)| *c == conversion)
            .map(|(_, r)| *r)
            .collect()
    }
}

fn to_heapless(roms: &[RomId]) -> Result<heapless::Vec<RomId, MAX_SENSORS>, BusError> {
    heapless::Vec::from_slice(roms).map_err(|_| BusError::TooManyDevices)
}

impl SensorBus for ScriptedBus {
    async fn enumerate(&mut self) -> Result<heapless::Vec<RomId, MAX_SENSORS>, BusError> {
        to_heapless(&self.primary)
    }

    async fn raw_scan(&mut self) -> Result<heapless::Vec<RomId, MAX_SENSORS>, BusError> {
        to_heapless(&self.raw)
    }

    async fn raw_scan_count(&mut self) -> Result<usize, BusError> {
        match self.raw_count {
            Some(n) => Ok(n),
            None => to_heapless(&self.raw).map(|roms| roms.len()),
        }
    }

    async fn trigger_conversion(&mut self) -> Result<(), BusError> {
        self.conversions += 1;
        if let Some(frame) = self.frames.pop_front() {
            self.current = frame;
        }
        Ok(())
    }

    async fn read_temperature(&mut self, rom: &RomId) -> f32 {
        self.reads.push((self.conversions, *rom));
        match self.raw.iter().position(|r| r == rom) {
            Some(i) => self.current.get(i).copied().unwrap_or(DEVICE_DISCONNECTED_C),
            None => DEVICE_DISCONNECTED_C,
        }
    }

    async fn set_resolution(&mut self, rom: &RomId, precision: Precision) -> Result<(), BusError> {
        self.resolutions.push((*rom, precision));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    pub out: String,
    pub keys: usize,
}

impl Console for RecordingConsole {
    async fn write_str(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.out.push_str(text);
        Ok(())
    }

    async fn wait_for_key(&mut self) -> Result<(), ConsoleError> {
        self.keys += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct NoDelay {
    pub total_ms: u64,
}

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ms += ns as u64 / 1_000_000;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms as u64;
    }
}
