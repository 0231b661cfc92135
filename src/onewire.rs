//! 1Wire bus primitives: ROM IDs, the Dallas CRC, and the ROM search.
//!
//! The search follows Maxim Application Note 187 "1-Wire Search Algorithm".
//! Everything here is written against the [`OneWire`] trait so the same code
//! drives the PIO master on hardware and the simulated wire in tests.

use core::fmt;
use core::future::Future;

use heapless::Vec;

use crate::error::BusError;

/// All 1Wire devices include an 8-byte ROM ID: 8-bit family code, 48-bit ID,
/// 8-bit CRC. Byte 0 is the family code.
pub type RomId = [u8; 8];

/// ROM-level commands every 1Wire device understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RomCommand {
    SearchRom = 0xf0,
    AlarmSearch = 0xec,
    MatchRom = 0x55,
    SkipRom = 0xcc,
}

/// Result of one search triplet: two reads, one write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Triplet {
    /// The bit as read (wired-AND of all participating devices)
    pub id_bit: bool,
    /// The complement bit as read
    pub cmp_id_bit: bool,
    /// The bit actually written back, which decides who stays in the search
    pub direction: bool,
}

/// Byte- and triplet-level access to a 1Wire bus.
pub trait OneWire {
    /// Reset the bus. Returns whether any device answered with a presence
    /// pulse.
    fn reset(&mut self) -> impl Future<Output = Result<bool, BusError>>;

    fn write_byte(&mut self, byte: u8) -> impl Future<Output = Result<(), BusError>>;

    fn read_byte(&mut self) -> impl Future<Output = Result<u8, BusError>>;

    /// Do a ROM search triplet. Receive two bits (id_bit and cmp_id_bit),
    /// then transmit a bit with this logic:
    ///
    /// | id_bit | cmp_id_bit | tx-bit      |
    /// | ------ | ---------- | ----------- |
    /// |      0 |          1 |           0 |
    /// |      1 |          0 |           1 |
    /// |      0 |          0 | `direction` |
    /// |      1 |          1 |           1 |
    fn triplet(&mut self, direction: bool) -> impl Future<Output = Result<Triplet, BusError>>;
}

/// Pick the bit to write for a triplet given what was read.
pub fn triplet_direction(id_bit: bool, cmp_id_bit: bool, direction: bool) -> bool {
    match (id_bit, cmp_id_bit) {
        (false, false) => direction,
        (false, true) => false,
        (true, _) => true,
    }
}

/// Incrementally calculate CRC8 from starting value and one new byte.
fn crc8_incremental(crc8: u8, data: u8) -> u8 {
    // See Maxim Application Note 27
    let mut crc8 = crc8 ^ data;
    for _ in 0..8 {
        if crc8 & 1 != 0 {
            crc8 = (crc8 >> 1) ^ 0x8c;
        } else {
            crc8 >>= 1;
        }
    }
    crc8
}

/// Calculate 1Wire CRC8 of a sequence of bytes. A ROM ID or scratchpad with
/// its trailing CRC byte included checks out when this returns 0.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, b| crc8_incremental(crc, *b))
}

/// Formats a ROM ID as `0x28, 0x55, 0xE9, ...`, the way it gets pasted into
/// a `DeviceAddress` initializer.
#[derive(Clone, Copy)]
pub struct RomHex<'a>(pub &'a RomId);

impl fmt::Display for RomHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "0x{:02X}", b)?;
        }
        Ok(())
    }
}

/// All 1Wire devices respond to a search algorithm that can be used to
/// enumerate a 1Wire bus. This struct tracks state for a search in progress.
#[derive(Clone, Debug, Default)]
pub struct SearchState {
    /// Set true going into `search` to use ALARM SEARCH command, else general SEARCH
    pub alarm_search: bool,
    // remaining values are private
    last_discrepancy: usize,
    last_family_discrepancy: usize,
    rom: RomId,
    last_device_flag: bool,
}

impl SearchState {
    /// Initialize SearchState for a general (all devices) search.
    pub fn start_general() -> Self {
        Default::default()
    }

    /// Initialize SearchState for a conditional ("alarm") search.
    pub fn start_alarm() -> Self {
        Self {
            alarm_search: true,
            ..Default::default()
        }
    }

    /// Bit position (1-based) of the last zero-branch taken inside the family
    /// code on the most recent pass, or 0.
    pub fn last_family_discrepancy(&self) -> usize {
        self.last_family_discrepancy
    }

    /// Forget progress so the next `search` starts over, keeping the mode.
    fn restart(&mut self) {
        *self = Self {
            alarm_search: self.alarm_search,
            ..Default::default()
        };
    }
}

/// Start or continue a search. Returns `Some(rom_id)`, in which case call
/// this function again with `st` unchanged to find more, or `None` if no more
/// exist. A `None` also leaves `st` ready for a fresh search.
pub async fn search<W: OneWire>(
    wire: &mut W,
    st: &mut SearchState,
) -> Result<Option<RomId>, BusError> {
    if st.last_device_flag {
        st.restart();
        return Ok(None);
    }

    if !wire.reset().await? {
        st.restart();
        return Ok(None);
    }

    let command = if st.alarm_search {
        RomCommand::AlarmSearch
    } else {
        RomCommand::SearchRom
    };
    wire.write_byte(command as u8).await?;

    let mut rom = st.rom;
    let mut last_zero = 0;
    for id_bit_number in 1..=64usize {
        let byte = (id_bit_number - 1) / 8;
        let mask = 1u8 << ((id_bit_number - 1) % 8);

        // Before the last discrepancy repeat last pass's choice; at it take
        // the 1 branch this time; past it take 0.
        let direction = if id_bit_number < st.last_discrepancy {
            rom[byte] & mask != 0
        } else {
            id_bit_number == st.last_discrepancy
        };

        let t = wire.triplet(direction).await?;
        trace!(
            "search: bit {} read {} {} write {}",
            id_bit_number,
            t.id_bit,
            t.cmp_id_bit,
            t.direction
        );

        // Nobody answered (or the last device was hot-removed)
        if t.id_bit && t.cmp_id_bit {
            st.restart();
            return Ok(None);
        }

        if !t.id_bit && !t.cmp_id_bit && !t.direction {
            last_zero = id_bit_number;
            if last_zero < 9 {
                st.last_family_discrepancy = last_zero;
            }
        }

        if t.direction {
            rom[byte] |= mask;
        } else {
            rom[byte] &= !mask;
        }
    }

    if crc8(&rom) != 0 || rom[0] == 0 {
        warn!("search: discarding ROM {} with bad CRC", rom);
        st.restart();
        return Ok(None);
    }

    st.rom = rom;
    st.last_discrepancy = last_zero;
    if last_zero == 0 {
        st.last_device_flag = true;
    }
    Ok(Some(rom))
}

/// Run a complete general search, collecting every ROM found in bus-scan
/// order.
pub async fn search_all<W: OneWire, const N: usize>(
    wire: &mut W,
) -> Result<Vec<RomId, N>, BusError> {
    let mut st = SearchState::start_general();
    let mut roms = Vec::new();
    while let Some(rom) = search(wire, &mut st).await? {
        debug!("search found {}", rom);
        roms.push(rom).map_err(|_| BusError::TooManyDevices)?;
    }
    Ok(roms)
}

/// Reset the bus, then silence all but one device by rom_id.
pub async fn rom_select<W: OneWire>(wire: &mut W, rom_id: &RomId) -> Result<(), BusError> {
    if !wire.reset().await? {
        return Err(BusError::NoPresence);
    }
    wire.write_byte(RomCommand::MatchRom as u8).await?;
    for b in rom_id {
        wire.write_byte(*b).await?;
    }
    Ok(())
}

/// Reset the bus and address every device at once.
pub async fn skip_rom<W: OneWire>(wire: &mut W) -> Result<(), BusError> {
    if !wire.reset().await? {
        return Err(BusError::NoPresence);
    }
    wire.write_byte(RomCommand::SkipRom as u8).await
}
