//! Guided sensor identification.
//!
//! The charger can't tell which DS18B20 on the shared bus sits in which
//! battery slot. The operator warms one probe at a time; whichever reading
//! climbs more than `delta_threshold_c` above the group baseline belongs to
//! the slot being asked for. After every battery slot is filled the one
//! sensor left over is the ambient probe. The result is printed as a
//! `DeviceAddress` table to paste into the charger firmware.
//!
//! ```text
//! enumerate ─> baseline ─┬─> detect slot k ─> baseline ─┐
//!                        └────────── k < N-1 ───────────┘
//!                                   │
//!                                   └─> resolve residual ─> emit table
//! ```

use core::fmt;

use embedded_hal_async::delay::DelayNs;

use crate::bus::{SensorBus, MAX_SENSORS};
use crate::console::Console;
use crate::devices::{is_valid_reading, Precision};
use crate::error::{BusError, IdentifyError, TableError};
use crate::onewire::RomHex;
use crate::sayln;
use crate::sensor::SensorSet;
use crate::table::{AssignmentTable, TableLiteral};

/// Device count reported when a scan overflows [`MAX_SENSORS`].
const OVER_CAPACITY: usize = MAX_SENSORS + 1;

/// Which sensors feed the baseline average.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaselinePolicy {
    /// Average every sensor, including ones already assigned (and maybe
    /// still warm). Matches the charger's original calibration sketch.
    AllSensors,
    /// Average only sensors not yet assigned to a slot.
    UnassignedOnly,
}

/// Tunables for the procedure. [`IdentifyConfig::default`] is the ASCD
/// charger: four battery slots plus ambient.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdentifyConfig {
    /// Sensors expected on the bus: one per battery slot plus ambient
    pub expected_sensor_count: usize,
    /// How far above baseline a reading must be to count as "warmed"
    pub delta_threshold_c: f32,
    /// Pause between sampling passes while waiting for a warm-up
    pub sample_interval_ms: u32,
    /// Resolution every sensor gets set to. Lower is faster to convert.
    pub resolution: Precision,
    pub baseline_policy: BaselinePolicy,
    /// Leave disconnected/out-of-range readings out of the baseline and
    /// out of detection
    pub reject_invalid_readings: bool,
    /// Give up on a slot after this many sampling passes. `None` waits for
    /// the operator forever.
    pub max_polls_per_slot: Option<u32>,
}

impl IdentifyConfig {
    pub const EXPECTED_SENSOR_COUNT: usize = 5;
    pub const DELTA_THRESHOLD_C: f32 = 2.5;
    pub const SAMPLE_INTERVAL_MS: u32 = 4000;

    /// The guided, wait-forever procedure.
    pub const fn ascd() -> Self {
        Self {
            expected_sensor_count: Self::EXPECTED_SENSOR_COUNT,
            delta_threshold_c: Self::DELTA_THRESHOLD_C,
            sample_interval_ms: Self::SAMPLE_INTERVAL_MS,
            resolution: Precision::Nine,
            baseline_policy: BaselinePolicy::AllSensors,
            reject_invalid_readings: true,
            max_polls_per_slot: None,
        }
    }

    /// Same, but each slot gives up after `max_polls` sampling passes.
    pub const fn headless(max_polls: u32) -> Self {
        Self {
            max_polls_per_slot: Some(max_polls),
            ..Self::ascd()
        }
    }

    pub const fn with_sensor_count(self, expected_sensor_count: usize) -> Self {
        Self {
            expected_sensor_count,
            ..self
        }
    }

    pub const fn with_delta_threshold(self, delta_threshold_c: f32) -> Self {
        Self {
            delta_threshold_c,
            ..self
        }
    }

    pub const fn with_baseline_policy(self, baseline_policy: BaselinePolicy) -> Self {
        Self {
            baseline_policy,
            ..self
        }
    }

    pub const fn with_reject_invalid_readings(self, reject_invalid_readings: bool) -> Self {
        Self {
            reject_invalid_readings,
            ..self
        }
    }

    /// Slots found by warming; the ambient slot comes after these.
    pub fn target_slots(&self) -> usize {
        self.expected_sensor_count.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<(), IdentifyError> {
        let count_ok = (2..=MAX_SENSORS).contains(&self.expected_sensor_count);
        let delta_ok = self.delta_threshold_c.is_finite() && self.delta_threshold_c > 0.0;
        let polls_ok = self.max_polls_per_slot != Some(0);
        if count_ok && delta_ok && polls_ok {
            Ok(())
        } else {
            Err(IdentifyError::InvalidConfig)
        }
    }
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self::ascd()
    }
}

/// Operator-facing slot name: "BATTERY 1".. for targets, "AMBIENT" last.
#[derive(Clone, Copy)]
pub struct SlotName {
    pub slot: usize,
    pub slots: usize,
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.slot + 1 == self.slots {
            f.write_str("AMBIENT")
        } else {
            write!(f, "BATTERY {}", self.slot + 1)
        }
    }
}

/// `[Battery1, Battery2, ..., Ambient]`
struct SlotOrder(usize);

impl fmt::Display for SlotOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for slot in 0..self.0.saturating_sub(1) {
            write!(f, "Battery{}, ", slot + 1)?;
        }
        f.write_str("Ambient]")
    }
}

/// All state of one identification run: the sensors, the running baseline,
/// and the slot table. Owned by whoever drives the procedure.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    sensors: SensorSet,
    table: AssignmentTable,
    baseline_c: f32,
}

impl Calibration {
    /// Fresh state with one slot per sensor, nothing assigned.
    pub fn new(sensors: SensorSet) -> Self {
        let table = AssignmentTable::new(sensors.len());
        Self {
            sensors,
            table,
            baseline_c: 0.0,
        }
    }

    pub fn sensors(&self) -> &SensorSet {
        &self.sensors
    }

    pub fn table(&self) -> &AssignmentTable {
        &self.table
    }

    pub fn baseline_c(&self) -> f32 {
        self.baseline_c
    }

    /// Seed the baseline, e.g. when resuming without a fresh baseline pass.
    pub fn set_baseline_c(&mut self, celsius: f32) {
        self.baseline_c = celsius;
    }

    /// Put `sensor` (physical index) in `slot`. Used by detection, and to
    /// pre-fill slots that are already known before resuming.
    pub fn assign(&mut self, slot: usize, sensor: usize) -> Result<(), TableError> {
        if sensor >= self.sensors.len() {
            return Err(TableError::SensorOutOfRange { sensor });
        }
        self.table.assign(slot, sensor)?;
        if !self.sensors.mark_assigned(sensor, slot) {
            // table and set disagree; table already rejects reused sensors
            return Err(TableError::SensorTaken { sensor });
        }
        Ok(())
    }

    /// The detection rule: strictly more than `delta_c` above baseline.
    pub fn exceeds_threshold(&self, celsius: f32, delta_c: f32) -> bool {
        celsius > self.baseline_c + delta_c
    }

    pub fn is_complete(&self) -> bool {
        self.table.is_complete()
    }

    pub fn literal(&self) -> Result<TableLiteral<'_>, TableError> {
        self.table.literal(&self.sensors)
    }
}

/// Drives the procedure over a sensor bus, an operator console and a delay
/// source.
pub struct Identifier<B, C, D> {
    bus: B,
    console: C,
    delay: D,
    config: IdentifyConfig,
}

impl<B: SensorBus, C: Console, D: DelayNs> Identifier<B, C, D> {
    pub fn new(bus: B, console: C, delay: D, config: IdentifyConfig) -> Result<Self, IdentifyError> {
        config.validate()?;
        Ok(Self {
            bus,
            console,
            delay,
            config,
        })
    }

    pub fn config(&self) -> &IdentifyConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn into_parts(self) -> (B, C, D) {
        (self.bus, self.console, self.delay)
    }

    /// The whole guided procedure, start to finish. Fatal conditions are
    /// explained on the console before the error comes back; the caller is
    /// expected to stop there.
    pub async fn run(&mut self) -> Result<Calibration, IdentifyError> {
        let batteries = self.config.target_slots();
        let c = &mut self.console;
        sayln!(c).await?;
        sayln!(c, "ASCD - DS18B20 Serial Detection (Guided)").await?;
        sayln!(c, "------------------------------------------------").await?;
        sayln!(c, "Preparation:").await?;
        sayln!(
            c,
            " 1. Connect all {} DS18B20 sensors ({} battery + 1 ambient).",
            self.config.expected_sensor_count,
            batteries
        )
        .await?;
        sayln!(c, " 2. Ensure everything is at room temperature.").await?;
        sayln!(c, " 3. Do NOT heat any sensors yet.").await?;
        sayln!(c).await?;
        sayln!(c, "When ready, we will:").await?;
        sayln!(c, " - Detect all OneWire devices.").await?;
        sayln!(c, " - Ask you to heat each battery sensor in turn.").await?;
        sayln!(c, " - Map physical sensors to: Battery 1-{} + Ambient.", batteries).await?;
        sayln!(c).await?;
        sayln!(c, "Press any key when ready...").await?;
        c.wait_for_key().await?;

        let sensors = self.enumerate().await?;
        self.calibrate(Calibration::new(sensors)).await
    }

    /// Bus Enumerator: find the sensors and check there are exactly as many
    /// as expected. A family-filtered count that comes up wrong is
    /// cross-checked with a raw scan before giving up.
    pub async fn enumerate(&mut self) -> Result<SensorSet, IdentifyError> {
        let expected = self.config.expected_sensor_count;
        let primary = match self.bus.enumerate().await {
            Ok(roms) => Some(roms),
            Err(BusError::TooManyDevices) => None,
            Err(e) => return Err(e.into()),
        };
        let primary_count = primary.as_ref().map_or(OVER_CAPACITY, |roms| roms.len());
        info!("enumerate: {} temperature sensors", primary_count);
        if primary.is_some() {
            sayln!(
                &mut self.console,
                "Temperature driver reports {} device(s) on the bus.",
                primary_count
            )
            .await?;
        } else {
            sayln!(
                &mut self.console,
                "Temperature driver reports more than {} device(s) on the bus.",
                MAX_SENSORS
            )
            .await?;
        }

        let addresses = match primary {
            Some(roms) if roms.len() == expected => roms,
            _ => {
                let c = &mut self.console;
                sayln!(c).await?;
                sayln!(
                    c,
                    "WARNING: Expected {} sensors ({} battery + 1 ambient).",
                    expected,
                    self.config.target_slots()
                )
                .await?;
                sayln!(c, "Attempting generic OneWire search...").await?;
                let raw = match self.bus.raw_scan_count().await {
                    Ok(n) => n,
                    Err(BusError::TooManyDevices) => OVER_CAPACITY,
                    Err(e) => return Err(e.into()),
                };
                sayln!(
                    &mut self.console,
                    "Generic OneWire search found {} device(s).",
                    raw
                )
                .await?;

                if raw != expected {
                    error!(
                        "enumerate: expected {}, driver found {}, raw found {}",
                        expected,
                        primary_count,
                        raw
                    );
                    let c = &mut self.console;
                    sayln!(c).await?;
                    sayln!(c, "ERROR: Sensor count mismatch.").await?;
                    sayln!(c, " - Check wiring.").await?;
                    sayln!(c, " - Confirm all {} DS18B20 are connected.", expected).await?;
                    sayln!(c, "Halting.").await?;
                    return Err(IdentifyError::PopulationMismatch {
                        primary: primary_count,
                        raw,
                        expected,
                    });
                }

                let mut raw = self.bus.raw_scan().await?;
                raw.truncate(expected);
                raw
            }
        };

        if addresses.len() != expected {
            let c = &mut self.console;
            sayln!(c).await?;
            sayln!(c, "ERROR: Could not read all sensor addresses.").await?;
            sayln!(c, "Halting.").await?;
            return Err(IdentifyError::AddressReadIncomplete {
                found: addresses.len(),
                expected,
            });
        }

        for (i, rom) in addresses.iter().enumerate() {
            sayln!(
                &mut self.console,
                "Found raw device {} address: {}",
                i,
                RomHex(rom)
            )
            .await?;
            if let Err(e) = self.bus.set_resolution(rom, self.config.resolution).await {
                // the bus falls back to the full 12-bit conversion wait
                warn!("set_resolution {} failed: {}", rom, e);
            }
        }

        SensorSet::from_addresses(&addresses).ok_or(IdentifyError::Bus(BusError::TooManyDevices))
    }

    /// Baseline, detection for every battery slot, the ambient leftover,
    /// then the table. `cal` may arrive with slots already filled.
    pub async fn calibrate(&mut self, mut cal: Calibration) -> Result<Calibration, IdentifyError> {
        let expected = self.config.expected_sensor_count;
        if cal.sensors().len() != expected {
            return Err(IdentifyError::PopulationMismatch {
                primary: cal.sensors().len(),
                raw: cal.sensors().len(),
                expected,
            });
        }

        sayln!(&mut self.console).await?;
        sayln!(&mut self.console, "Computing baseline average temperature...").await?;
        self.compute_baseline(&mut cal).await?;

        let c = &mut self.console;
        sayln!(c).await?;
        sayln!(c, "DETECTION INSTRUCTIONS").await?;
        sayln!(c, "----------------------").await?;
        sayln!(c, "We will now detect which sensor is which by heating them one by one.").await?;
        sayln!(c, "For each battery slot:").await?;
        sayln!(c, " 1. Wait for instructions 'Heat sensor for Battery X'.").await?;
        sayln!(c, " 2. Gently warm the matching probe (pinch it between fingers, etc.).").await?;
        sayln!(
            c,
            " 3. When you see a sensor jump > {:.1} C above baseline,",
            self.config.delta_threshold_c
        )
        .await?;
        sayln!(c, "    it will be assigned to that battery.").await?;
        sayln!(c).await?;
        sayln!(c, "Ambient sensor will be whichever sensor is left at the end.").await?;
        sayln!(c).await?;
        sayln!(c, "Press any key to start...").await?;
        c.wait_for_key().await?;

        self.detect_targets(&mut cal).await?;
        self.resolve_residual(&mut cal).await?;
        self.emit_table(&cal).await?;
        Ok(cal)
    }

    /// Baseline Estimator: one conversion, then the mean of the readings
    /// allowed by the baseline policy. Overwrites `cal`'s baseline.
    pub async fn compute_baseline(&mut self, cal: &mut Calibration) -> Result<f32, IdentifyError> {
        self.bus.trigger_conversion().await?;

        let mut sum = 0.0f32;
        let mut count = 0usize;
        for (i, sensor) in cal.sensors.iter().enumerate() {
            if self.config.baseline_policy == BaselinePolicy::UnassignedOnly
                && sensor.is_assigned()
            {
                continue;
            }
            let t = self.bus.read_temperature(sensor.address()).await;
            if self.config.reject_invalid_readings && !is_valid_reading(t) {
                warn!("baseline: sensor {} reading {} rejected", i, t);
                sayln!(
                    &mut self.console,
                    "Sensor {} reading {:.2} C ignored (disconnected?)",
                    i,
                    t
                )
                .await?;
                continue;
            }
            sum += t;
            count += 1;
        }

        if count == 0 {
            let c = &mut self.console;
            sayln!(c, "ERROR: No valid temperature readings for the baseline.").await?;
            sayln!(c, " - Check sensor wiring and pull-up.").await?;
            sayln!(c, "Halting.").await?;
            return Err(IdentifyError::NoValidReadings);
        }

        cal.baseline_c = sum / count as f32;
        debug!("baseline {} over {} sensors", cal.baseline_c, count);
        sayln!(
            &mut self.console,
            "Baseline average temperature: {:.2} C",
            cal.baseline_c
        )
        .await?;
        Ok(cal.baseline_c)
    }

    /// Slot Detector for one battery slot. Polls the unassigned sensors until
    /// one reads more than the threshold above baseline and assigns it.
    /// Returns `None` when the slot was already filled.
    pub async fn detect_slot(
        &mut self,
        cal: &mut Calibration,
        slot: usize,
    ) -> Result<Option<usize>, IdentifyError> {
        if slot >= self.config.target_slots() {
            return Err(TableError::SlotOutOfRange { slot }.into());
        }
        if cal.table.is_assigned(slot) {
            debug!("slot {} already assigned, skipping", slot);
            return Ok(None);
        }

        let name = SlotName {
            slot,
            slots: cal.table.len(),
        };
        let c = &mut self.console;
        sayln!(c).await?;
        sayln!(c, "------------------------------------------------").await?;
        sayln!(c, "Heat sensor for {} now!", name).await?;
        sayln!(c, "Keep it warm until 'Detected {}' appears.", name).await?;
        sayln!(c, "------------------------------------------------").await?;

        let delta = self.config.delta_threshold_c;
        let mut polls = 0u32;
        loop {
            self.bus.trigger_conversion().await?;
            polls += 1;

            let mut found = None;
            for (i, sensor) in cal.sensors.unassigned() {
                let t = self.bus.read_temperature(sensor.address()).await;
                sayln!(&mut self.console, "Sensor {} Temp: {:.2} C", i, t).await?;
                if self.config.reject_invalid_readings && !is_valid_reading(t) {
                    continue;
                }
                // first one over the line wins; the rest wait for the next pass
                if cal.exceeds_threshold(t, delta) {
                    found = Some((i, t));
                    break;
                }
            }

            if let Some((i, t)) = found {
                cal.assign(slot, i)?;
                info!("slot {} -> sensor {} at {}", slot, i, t);
                sayln!(&mut self.console).await?;
                sayln!(&mut self.console, "Detected {} as sensor index {}", name, i).await?;
            } else if self.config.max_polls_per_slot.is_some_and(|max| polls >= max) {
                warn!("slot {} timed out after {} passes", slot, polls);
                let c = &mut self.console;
                sayln!(c).await?;
                sayln!(c, "ERROR: No sensor warmed up for {}.", name).await?;
                sayln!(c, "Halting.").await?;
                return Err(IdentifyError::SlotTimeout { slot });
            }

            let ms = self.config.sample_interval_ms;
            if ms % 1000 == 0 {
                sayln!(
                    &mut self.console,
                    "Waiting {} seconds before next temp sample...",
                    ms / 1000
                )
                .await?;
            } else {
                sayln!(&mut self.console, "Waiting {} ms before next temp sample...", ms).await?;
            }
            self.delay.delay_ms(ms).await;

            if let Some((i, _)) = found {
                return Ok(Some(i));
            }
        }
    }

    /// Every battery slot in index order, re-baselining after each one that
    /// gets detected.
    pub async fn detect_targets(&mut self, cal: &mut Calibration) -> Result<(), IdentifyError> {
        for slot in 0..self.config.target_slots() {
            if self.detect_slot(cal, slot).await?.is_some() {
                self.compute_baseline(cal).await?;
            }
        }
        Ok(())
    }

    /// Residual Resolver: the one sensor never warmed is the ambient probe.
    pub async fn resolve_residual(&mut self, cal: &mut Calibration) -> Result<usize, IdentifyError> {
        let c = &mut self.console;
        sayln!(c).await?;
        sayln!(c, "------------------------------------------------").await?;
        sayln!(c, "Detecting ambient sensor (the last unheated one)...").await?;

        let unassigned = cal.sensors.unassigned_count();
        let residual = match cal.sensors.unassigned().next() {
            Some((i, _)) if unassigned == 1 => i,
            _ => {
                error!("residual: {} unassigned sensors", unassigned);
                sayln!(c, "ERROR: Could not find an unassigned sensor for ambient.").await?;
                sayln!(c, "Halting.").await?;
                return Err(IdentifyError::ResidualInconsistent { unassigned });
            }
        };

        let slot = cal.table.residual_slot();
        cal.assign(slot, residual)?;
        info!("ambient -> sensor {}", residual);
        sayln!(&mut self.console, "Ambient sensor is index {}", residual).await?;
        Ok(residual)
    }

    /// Print the finished table for the operator to copy.
    pub async fn emit_table(&mut self, cal: &Calibration) -> Result<(), IdentifyError> {
        let literal = cal.literal()?;
        let c = &mut self.console;
        sayln!(c).await?;
        sayln!(c, "================================================").await?;
        sayln!(c, " DS18B20 ADDRESS MAPPING COMPLETE").await?;
        sayln!(c, "================================================").await?;
        sayln!(c).await?;
        sayln!(c, "Order: {}", SlotOrder(cal.table.len())).await?;
        sayln!(c).await?;
        sayln!(c, "Copy the following into your Temp_Sensor_Serials.h:").await?;
        sayln!(c).await?;
        for line in literal.lines() {
            sayln!(c, "{}", line).await?;
        }
        sayln!(c).await?;
        sayln!(c, "Finished. Reset the board to re-run detection.").await?;
        sayln!(c, "================================================").await?;
        Ok(())
    }
}
