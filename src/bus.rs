//! The sensor bus as the identification procedure sees it: five operations,
//! no protocol. [`Ds18Bus`] provides them on top of any [`OneWire`].

use core::future::Future;

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;

use crate::devices::{
    DsCommand, Precision, Scratchpad, TemperatureSensorFamily, DEVICE_DISCONNECTED_C,
};
use crate::error::BusError;
use crate::onewire::{rom_select, search_all, skip_rom, OneWire, RomId};

/// Most devices a bus scan will track.
pub const MAX_SENSORS: usize = 16;

/// Conversion wait used before any resolution has been set, and for families
/// without a datasheet figure.
const DEFAULT_T_CONV_MS: u32 = 750;

/// Port for the temperature sensor bus.
pub trait SensorBus {
    /// Addresses of the temperature sensors on the bus, in bus-scan order.
    /// Devices of other families are left out.
    fn enumerate(&mut self) -> impl Future<Output = Result<Vec<RomId, MAX_SENSORS>, BusError>>;

    /// Every device that answers a ROM search, whatever its family.
    fn raw_scan(&mut self) -> impl Future<Output = Result<Vec<RomId, MAX_SENSORS>, BusError>>;

    /// Cross-check count from a protocol-agnostic scan.
    fn raw_scan_count(&mut self) -> impl Future<Output = Result<usize, BusError>> {
        async move { self.raw_scan().await.map(|roms| roms.len()) }
    }

    /// Start a conversion on every sensor at once and wait for it to finish.
    fn trigger_conversion(&mut self) -> impl Future<Output = Result<(), BusError>>;

    /// Last converted temperature of one sensor in Celsius. A failed read
    /// comes back as [`DEVICE_DISCONNECTED_C`], not an error.
    fn read_temperature(&mut self, rom: &RomId) -> impl Future<Output = f32>;

    fn set_resolution(
        &mut self,
        rom: &RomId,
        precision: Precision,
    ) -> impl Future<Output = Result<(), BusError>>;
}

/// DS18-family sensors on a 1Wire bus.
pub struct Ds18Bus<W, D> {
    wire: W,
    delay: D,
    /// How long `trigger_conversion` waits. Tracks the slowest device whose
    /// resolution we've set.
    t_conv_ms: u32,
    resolution_set: bool,
}

impl<W: OneWire, D: DelayNs> Ds18Bus<W, D> {
    pub fn new(wire: W, delay: D) -> Self {
        Self {
            wire,
            delay,
            t_conv_ms: DEFAULT_T_CONV_MS,
            resolution_set: false,
        }
    }

    /// Milliseconds `trigger_conversion` currently waits.
    pub fn conversion_wait_ms(&self) -> u32 {
        self.t_conv_ms
    }

    pub fn wire(&self) -> &W {
        &self.wire
    }

    pub fn wire_mut(&mut self) -> &mut W {
        &mut self.wire
    }

    pub fn into_inner(self) -> (W, D) {
        (self.wire, self.delay)
    }

    /// Wait long enough for the slowest device configured so far.
    fn track_conversion_wait(&mut self, t_conv: u32) {
        self.t_conv_ms = if self.resolution_set {
            self.t_conv_ms.max(t_conv)
        } else {
            t_conv
        };
        self.resolution_set = true;
    }

    /// Rewrite the config register, keeping the alarm bytes.
    async fn write_config(&mut self, rom: &RomId, precision: Precision) -> Result<(), BusError> {
        let sp = self.read_scratchpad(rom).await?;
        rom_select(&mut self.wire, rom).await?;
        self.wire.write_byte(DsCommand::WriteScratchpad as u8).await?;
        self.wire.write_byte(sp.th()).await?;
        self.wire.write_byte(sp.tl()).await?;
        self.wire.write_byte(precision.config_register()).await
    }

    async fn read_scratchpad(&mut self, rom: &RomId) -> Result<Scratchpad, BusError> {
        rom_select(&mut self.wire, rom).await?;
        self.wire.write_byte(DsCommand::ReadScratchpad as u8).await?;
        let mut bytes = [0u8; 9];
        for b in bytes.iter_mut() {
            *b = self.wire.read_byte().await?;
        }
        let sp = Scratchpad(bytes);
        if sp.is_valid() {
            Ok(sp)
        } else {
            Err(BusError::Crc)
        }
    }
}

impl<W: OneWire, D: DelayNs> SensorBus for Ds18Bus<W, D> {
    async fn enumerate(&mut self) -> Result<Vec<RomId, MAX_SENSORS>, BusError> {
        let mut roms = self.raw_scan().await?;
        roms.retain(|rom| TemperatureSensorFamily::from_code(rom[0]).is_some());
        Ok(roms)
    }

    async fn raw_scan(&mut self) -> Result<Vec<RomId, MAX_SENSORS>, BusError> {
        search_all(&mut self.wire).await
    }

    async fn trigger_conversion(&mut self) -> Result<(), BusError> {
        skip_rom(&mut self.wire).await?;
        self.wire.write_byte(DsCommand::ConvertT as u8).await?;
        self.delay.delay_ms(self.t_conv_ms).await;
        Ok(())
    }

    async fn read_temperature(&mut self, rom: &RomId) -> f32 {
        let Some(family) = TemperatureSensorFamily::from_code(rom[0]) else {
            return DEVICE_DISCONNECTED_C;
        };
        match self.read_scratchpad(rom).await {
            Ok(sp) => sp.celsius(family),
            Err(e) => {
                warn!("read {} failed: {}", rom, e);
                DEVICE_DISCONNECTED_C
            }
        }
    }

    async fn set_resolution(&mut self, rom: &RomId, precision: Precision) -> Result<(), BusError> {
        let family = TemperatureSensorFamily::from_code(rom[0]);
        let t_conv = family
            .and_then(|f| precision.t_conv_ms(f))
            .unwrap_or(DEFAULT_T_CONV_MS);

        if !family.is_some_and(|f| f.has_config_register()) {
            debug!("{} has no resolution setting", rom);
            self.track_conversion_wait(t_conv);
            return Ok(());
        }

        match self.write_config(rom, precision).await {
            Ok(()) => {
                debug!("{} set to {} bits", rom, precision.bits());
                self.track_conversion_wait(t_conv);
                Ok(())
            }
            Err(e) => {
                // resolution unknown now, so assume the slowest
                self.track_conversion_wait(DEFAULT_T_CONV_MS);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{rom_with_crc, SimWire};
    use embassy_futures::block_on;

    struct NoDelay {
        waited_ms: u32,
    }

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.waited_ms += ns / 1_000_000;
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.waited_ms += ms;
        }
    }

    fn bus_with(roms: &[RomId]) -> Ds18Bus<SimWire, NoDelay> {
        Ds18Bus::new(SimWire::with_roms(roms), NoDelay { waited_ms: 0 })
    }

    #[test]
    fn test_enumerate_filters_family() {
        let temp_a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let temp_b = rom_with_crc([0x10, 9, 8, 7, 6, 5, 4]);
        let eeprom = rom_with_crc([0x2d, 1, 1, 1, 1, 1, 1]);
        let mut bus = bus_with(&[temp_a, eeprom, temp_b]);

        let sensors = block_on(bus.enumerate()).unwrap();
        assert_eq!(sensors.len(), 2);
        assert!(sensors.contains(&temp_a));
        assert!(sensors.contains(&temp_b));
        assert!(!sensors.contains(&eeprom));

        assert_eq!(block_on(bus.raw_scan_count()).unwrap(), 3);
    }

    #[test]
    fn test_conversion_and_read() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let b = rom_with_crc([0x28, 6, 5, 4, 3, 2, 1]);
        let mut bus = bus_with(&[a, b]);
        bus.wire_mut().set_temperature(0, 22.5);
        bus.wire_mut().set_temperature(1, 26.0);

        // before any conversion the DS18B20 reports its power-on 85C
        assert_eq!(block_on(bus.read_temperature(&a)), 85.0);

        block_on(bus.trigger_conversion()).unwrap();
        assert_eq!(bus.wire().conversions, 1);
        assert_eq!(block_on(bus.read_temperature(&a)), 22.5);
        assert_eq!(block_on(bus.read_temperature(&b)), 26.0);
        assert_eq!(bus.into_inner().1.waited_ms, DEFAULT_T_CONV_MS);
    }

    #[test]
    fn test_set_resolution_rewrites_config_and_wait() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let mut bus = bus_with(&[a]);
        bus.wire_mut().set_temperature(0, 22.4375);

        block_on(bus.set_resolution(&a, Precision::Nine)).unwrap();
        assert_eq!(bus.wire().devices[0].scratchpad[4], 0x1f);
        // alarm bytes untouched
        assert_eq!(bus.wire().devices[0].scratchpad[2], 0x4b);
        assert_eq!(bus.wire().devices[0].scratchpad[3], 0x46);
        assert_eq!(bus.conversion_wait_ms(), 94);

        block_on(bus.trigger_conversion()).unwrap();
        // 9 bits only resolve half degrees
        assert_eq!(block_on(bus.read_temperature(&a)), 22.0);
    }

    #[test]
    fn test_resolution_wait_tracks_slowest_device() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let s = rom_with_crc([0x10, 1, 2, 3, 4, 5, 6]);
        let mut bus = bus_with(&[a, s]);
        block_on(bus.set_resolution(&a, Precision::Nine)).unwrap();
        block_on(bus.set_resolution(&s, Precision::Nine)).unwrap();
        assert_eq!(bus.conversion_wait_ms(), 750);
    }

    #[test]
    fn test_failed_resolution_keeps_full_wait() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let b = rom_with_crc([0x28, 6, 5, 4, 3, 2, 1]);
        let mut bus = bus_with(&[a, b]);
        block_on(bus.set_resolution(&a, Precision::Nine)).unwrap();
        assert_eq!(bus.conversion_wait_ms(), 94);

        bus.wire_mut().devices[1].corrupt = true;
        assert_eq!(
            block_on(bus.set_resolution(&b, Precision::Nine)),
            Err(BusError::Crc)
        );
        // still at its power-on 12 bits
        assert_eq!(bus.wire().devices[1].scratchpad[4], 0x7f);
        assert_eq!(bus.conversion_wait_ms(), DEFAULT_T_CONV_MS);

        // a later success doesn't shorten it again
        bus.wire_mut().devices[1].corrupt = false;
        block_on(bus.set_resolution(&b, Precision::Nine)).unwrap();
        assert_eq!(bus.conversion_wait_ms(), DEFAULT_T_CONV_MS);
    }

    #[test]
    fn test_first_resolution_failure_keeps_full_wait() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let mut bus = bus_with(&[a]);
        bus.wire_mut().devices[0].corrupt = true;
        assert!(block_on(bus.set_resolution(&a, Precision::Nine)).is_err());
        assert_eq!(bus.conversion_wait_ms(), DEFAULT_T_CONV_MS);
    }

    #[test]
    fn test_corrupt_read_gives_sentinel() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let mut bus = bus_with(&[a]);
        bus.wire_mut().devices[0].corrupt = true;
        block_on(bus.trigger_conversion()).unwrap();
        assert_eq!(block_on(bus.read_temperature(&a)), DEVICE_DISCONNECTED_C);
    }

    #[test]
    fn test_missing_device_gives_sentinel() {
        let a = rom_with_crc([0x28, 1, 2, 3, 4, 5, 6]);
        let gone = rom_with_crc([0x28, 7, 7, 7, 7, 7, 7]);
        let mut bus = bus_with(&[a]);
        block_on(bus.trigger_conversion()).unwrap();
        assert_eq!(block_on(bus.read_temperature(&gone)), DEVICE_DISCONNECTED_C);
    }
}
