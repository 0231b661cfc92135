//! Simulated 1Wire wire carrying DS18-style devices, for unit tests.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::devices::{DsCommand, Precision, FAMILY_DS18S20};
use crate::error::BusError;
use crate::onewire::{crc8, triplet_direction, OneWire, RomCommand, RomId, Triplet};

pub fn rom_with_crc(head: [u8; 7]) -> RomId {
    let mut rom = [0u8; 8];
    rom[..7].copy_from_slice(&head);
    rom[7] = crc8(&head);
    rom
}

pub struct SimDevice {
    pub rom: RomId,
    pub temperature_c: f32,
    pub scratchpad: [u8; 9],
    /// Scratchpad reads come back with a broken CRC
    pub corrupt: bool,
    /// Answers an Alarm Search
    pub alarm: bool,
}

impl SimDevice {
    fn new(rom: RomId) -> Self {
        // power-on scratchpad: 85C, TH/TL defaults, 12-bit
        let mut scratchpad = [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10, 0];
        scratchpad[8] = crc8(&scratchpad[..8]);
        Self {
            rom,
            temperature_c: 22.0,
            scratchpad,
            corrupt: false,
            alarm: false,
        }
    }

    fn convert(&mut self) {
        let raw: i16 = if self.rom[0] == FAMILY_DS18S20 {
            (self.temperature_c * 2.0) as i16
        } else {
            let bits = Precision::from_config_register(self.scratchpad[4]).bits();
            let drop = 12 - bits as u32;
            let raw = (self.temperature_c * 16.0) as i16;
            (raw >> drop) << drop
        };
        let [lsb, msb] = raw.to_le_bytes();
        self.scratchpad[0] = lsb;
        self.scratchpad[1] = msb;
        self.scratchpad[8] = crc8(&self.scratchpad[..8]);
    }
}

enum Mode {
    Idle,
    RomCommand,
    Search { active: Vec<bool>, bit: usize },
    MatchRom { received: Vec<u8> },
    Function { selected: Vec<usize> },
    WriteScratchpad { selected: Vec<usize>, pos: usize },
    ReadScratchpad { device: Option<usize>, pos: usize },
}

pub struct SimWire {
    pub devices: Vec<SimDevice>,
    pub conversions: usize,
    /// Temperatures to apply at each upcoming Convert T, one frame per
    /// conversion. Once empty, devices keep their last temperature.
    script: VecDeque<Vec<f32>>,
    mode: Mode,
}

impl SimWire {
    pub fn with_roms(roms: &[RomId]) -> Self {
        Self {
            devices: roms.iter().map(|r| SimDevice::new(*r)).collect(),
            conversions: 0,
            script: VecDeque::new(),
            mode: Mode::Idle,
        }
    }

    pub fn set_temperature(&mut self, index: usize, celsius: f32) {
        self.devices[index].temperature_c = celsius;
    }

    pub fn script<const N: usize>(&mut self, frames: &[[f32; N]]) {
        self.script.extend(frames.iter().map(|f| f.to_vec()));
    }

    fn bit_of(rom: &RomId, bit: usize) -> bool {
        rom[bit / 8] & (1 << (bit % 8)) != 0
    }
}

impl OneWire for SimWire {
    async fn reset(&mut self) -> Result<bool, BusError> {
        self.mode = Mode::RomCommand;
        Ok(!self.devices.is_empty())
    }

    async fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        let mode = core::mem::replace(&mut self.mode, Mode::Idle);
        self.mode = match mode {
            Mode::RomCommand => match byte {
                b if b == RomCommand::SearchRom as u8 => Mode::Search {
                    active: std::vec![true; self.devices.len()],
                    bit: 0,
                },
                b if b == RomCommand::AlarmSearch as u8 => Mode::Search {
                    active: self.devices.iter().map(|d| d.alarm).collect(),
                    bit: 0,
                },
                b if b == RomCommand::MatchRom as u8 => Mode::MatchRom {
                    received: Vec::new(),
                },
                b if b == RomCommand::SkipRom as u8 => Mode::Function {
                    selected: (0..self.devices.len()).collect(),
                },
                _ => Mode::Idle,
            },
            Mode::MatchRom { mut received } => {
                received.push(byte);
                if received.len() == 8 {
                    let selected = self
                        .devices
                        .iter()
                        .enumerate()
                        .filter(|(_, d)| d.rom[..] == received[..])
                        .map(|(i, _)| i)
                        .collect();
                    Mode::Function { selected }
                } else {
                    Mode::MatchRom { received }
                }
            }
            Mode::Function { selected } => match byte {
                b if b == DsCommand::ConvertT as u8 => {
                    self.conversions += 1;
                    if let Some(frame) = self.script.pop_front() {
                        for (d, t) in self.devices.iter_mut().zip(frame) {
                            d.temperature_c = t;
                        }
                    }
                    for i in &selected {
                        self.devices[*i].convert();
                    }
                    Mode::Idle
                }
                b if b == DsCommand::ReadScratchpad as u8 => Mode::ReadScratchpad {
                    device: selected.first().copied(),
                    pos: 0,
                },
                b if b == DsCommand::WriteScratchpad as u8 => {
                    Mode::WriteScratchpad { selected, pos: 0 }
                }
                _ => Mode::Idle,
            },
            Mode::WriteScratchpad { selected, pos } => {
                for i in &selected {
                    let d = &mut self.devices[*i];
                    d.scratchpad[2 + pos] = byte;
                    d.scratchpad[8] = crc8(&d.scratchpad[..8]);
                }
                if pos + 1 < 3 {
                    Mode::WriteScratchpad {
                        selected,
                        pos: pos + 1,
                    }
                } else {
                    Mode::Idle
                }
            }
            other => other,
        };
        Ok(())
    }

    async fn read_byte(&mut self) -> Result<u8, BusError> {
        if let Mode::ReadScratchpad { device, pos } = &mut self.mode {
            let byte = match device {
                Some(i) if *pos < 9 => {
                    let d = &self.devices[*i];
                    if d.corrupt && *pos == 8 {
                        d.scratchpad[8] ^ 0x5a
                    } else {
                        d.scratchpad[*pos]
                    }
                }
                _ => 0xff,
            };
            *pos += 1;
            return Ok(byte);
        }
        Ok(0xff)
    }

    async fn triplet(&mut self, direction: bool) -> Result<Triplet, BusError> {
        let Mode::Search { active, bit } = &mut self.mode else {
            return Ok(Triplet {
                id_bit: true,
                cmp_id_bit: true,
                direction: true,
            });
        };
        let participants = || {
            self.devices
                .iter()
                .zip(active.iter())
                .filter(|(_, a)| **a)
                .map(|(d, _)| Self::bit_of(&d.rom, *bit))
        };
        // open drain: a line reads 1 only if nobody pulls it low
        let id_bit = participants().all(|b| b);
        let cmp_id_bit = participants().all(|b| !b);
        let direction = triplet_direction(id_bit, cmp_id_bit, direction);
        for (d, a) in self.devices.iter().zip(active.iter_mut()) {
            if Self::bit_of(&d.rom, *bit) != direction {
                *a = false;
            }
        }
        *bit += 1;
        Ok(Triplet {
            id_bit,
            cmp_id_bit,
            direction,
        })
    }
}
