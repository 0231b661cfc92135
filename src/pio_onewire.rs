//! Pio-backed 1Wire master for the RP2040.
//!
//! Please refer to stefanalt's original work for much helpful commentation
//! on the PIO program. Note there's no support for 1Wire's overdrive speed
//! mode, and no strong pull-up: the ASCD probes are externally powered.
//!
//! The program shifts one bit per bus slot and the FIFO thresholds decide
//! how many slots a push covers (1 for reset, 2+1 for a search triplet, 8
//! for a byte). Stock embassy-rp has no call to change thresholds or the
//! clock divider on a running state machine, so we keep the `Config` around
//! and re-apply it with the SM stopped; the bus doesn't mind, 1Wire allows
//! any amount of idle time between slots.

use embassy_rp::clocks::clk_sys_freq;
use embassy_rp::gpio::{Drive, Level, Pull};
use embassy_rp::pio::{
    instr, Common, Config, Direction, Instance, LoadedProgram, PioPin, ShiftConfig,
    ShiftDirection, StateMachine,
};
use embassy_time::{with_timeout, Duration};
use fixed::traits::ToFixed;
use fixed::{types::extra::U8, FixedU32};

use crate::error::BusError;
use crate::onewire::{triplet_direction, OneWire, Triplet};

/// Longest any single push/pull round trip may take. A reset is the slowest
/// at ~1ms.
const OP_TIMEOUT: Duration = Duration::from_millis(5);

/// Microseconds per PIO instruction for data slots and for the reset pulse.
const SLOT_US_PER_CYCLE: u32 = 3;
const RESET_US_PER_CYCLE: u32 = 70;

/// Until labels are exposed we have to manually count locations.
const INSTR_LABEL_RESET: u8 = 0;
const INSTR_LABEL_START: u8 = 8;

/// Represent a PIO program, including its code and wraps.
pub struct PioOneWireMasterProgram<'a, PIO: Instance> {
    prg: LoadedProgram<'a, PIO>,
}

impl<'a, PIO: Instance> PioOneWireMasterProgram<'a, PIO> {
    /// Load program
    pub fn new(common: &mut Common<'a, PIO>) -> Self {
        let prg = pio_proc::pio_asm!(
            r#"
; .program onewire
.side_set 1 pindirs

public reset:
    nop           side 1 [6]     ; (1+6)*70us = 490us low
    nop           side 0         ; 1*70us = 70us high
    in pins, 1    side 0 [6]     ; will sample pin state
                                 ; and (1+6)*70us = 480us high delay
                                 ; to next operation
    jmp start     side 0;

; The rx/tx-branch assumes 3us instruction timing (CLKDIV = CPU-MHz*3)
.wrap_target
do_0:
    in pins, 1    side 1 [15]   ; will sample s.th. (value does not care)
                                ; and provides (1+15)*3us = 48us low
    jmp get_bit   side 1  [1]   ; (1+1)*3us = 6us low
do_1:
    nop           side 0  [2]   ; (1+2)*3us = 9us high
    in pins, 1    side 0 [14]   ; will sample pin state at samplepoint
                                ; and provides (1+14)*3us = 45us high
public start:
get_bit:
    mov pins, y   side 0  [2]   ; y would drive a strong pull-up; unused
                                ; and provides (1+2)*3us = 9us low between bits
public waiting:
    out x, 1      side 0        ; stalls if no data available
                                ; and provides additional 3us high between
                                ; bits, more if stalling
    jmp x-- do_1  side 1  [1]   ; (1+1)*3us = 6us low to start a bit cycle
.wrap
        "#,
        );
        let prg = common.load_program(&prg.program);
        Self { prg }
    }
}

fn divider(us_per_cycle: u32) -> FixedU32<U8> {
    ((clk_sys_freq() / 1_000_000) * us_per_cycle).to_fixed()
}

/// Pio-backed 1Wire driver
pub struct PioOneWireMaster<'d, PIO: Instance, const SM: usize> {
    sm: StateMachine<'d, PIO, SM>,
    cfg: Config<'d, PIO>,
    /// The offset in program memory of the start of our program
    origin: u8,
    /// Bits per FIFO word currently configured
    threshold: u8,
}

impl<'d, PIO: Instance, const SM: usize> PioOneWireMaster<'d, PIO, SM> {
    pub fn new(
        common: &mut Common<'d, PIO>,
        mut sm: StateMachine<'d, PIO, SM>,
        pin: impl PioPin,
        program: &PioOneWireMasterProgram<'d, PIO>,
    ) -> Self {
        let mut pin = common.make_pio_pin(pin);
        pin.set_pull(Pull::Up);
        pin.set_drive_strength(Drive::_4mA);
        // open drain: the sideset flips direction, the output stays low
        sm.set_pins(Level::Low, &[&pin]);
        sm.set_pin_dirs(Direction::In, &[&pin]);

        let mut cfg = Config::default();
        cfg.use_program(&program.prg, &[&pin]);
        cfg.set_in_pins(&[&pin]); // data line is read directly
        cfg.shift_in = ShiftConfig {
            auto_fill: true,
            direction: ShiftDirection::Right,
            threshold: 8,
        };
        cfg.shift_out = ShiftConfig {
            auto_fill: true,
            direction: ShiftDirection::Right,
            threshold: 8,
        };
        cfg.clock_divider = divider(SLOT_US_PER_CYCLE);
        trace!("PioOneWireMaster::new: divider {}", cfg.clock_divider.to_num::<f32>());

        let mut this = Self {
            sm,
            cfg,
            origin: program.prg.origin,
            threshold: 8,
        };
        this.apply(INSTR_LABEL_START);
        this
    }

    /// Stop the SM, push the current config, and resume at `label`.
    fn apply(&mut self, label: u8) {
        self.sm.set_enable(false);
        self.sm.set_config(&self.cfg);
        // Safe because we're the only writer, and the SM isn't enabled.
        unsafe {
            // y=1 keeps the (absent) strong pull-up released
            instr::set_y(&mut self.sm, 1);
            instr::exec_jmp(&mut self.sm, self.origin + label);
        }
        // set_y leaves bits in the OSR
        self.sm.clear_fifos();
        self.sm.set_enable(true);
    }

    fn set_thresholds(&mut self, bits: u8) {
        if bits == self.threshold {
            return;
        }
        self.threshold = bits;
        self.cfg.shift_in.threshold = bits;
        self.cfg.shift_out.threshold = bits;
        self.apply(INSTR_LABEL_START);
    }

    /// The general "send bits" function: `bits` slots go out, each slot is
    /// sampled, and the sampled word comes back. Writing a 1 bit leaves the
    /// line to the devices, so writing all ones is how we read. With
    /// `ShiftDirection::Right` the last slot is the MSB of the result.
    async fn exchange(&mut self, bits: u8, data: u32) -> Result<u32, BusError> {
        self.set_thresholds(bits);
        self.sm.tx().push(data);
        let word = with_timeout(OP_TIMEOUT, self.sm.rx().wait_pull())
            .await
            .map_err(|_| {
                error!("1W exchange of {} bits timed out", bits);
                BusError::Timeout
            })?;
        trace!("exchange {} bits: {:x} -> {:x}", bits, data, word);
        Ok(word >> (32 - bits as u32))
    }
}

impl<'d, PIO: Instance, const SM: usize> OneWire for PioOneWireMaster<'d, PIO, SM> {
    /// Reset the bus, without concern for current state - we wipe it out.
    async fn reset(&mut self) -> Result<bool, BusError> {
        // Slow the clock to match the reset section of the PIO program, and
        // set thresholds for bit-by-bit operation
        self.threshold = 1;
        self.cfg.shift_in.threshold = 1;
        self.cfg.shift_out.threshold = 1;
        self.cfg.clock_divider = divider(RESET_US_PER_CYCLE);
        self.apply(INSTR_LABEL_RESET);

        // any device present pulled the line low, shifting 0 into the MSB
        let sampled = with_timeout(OP_TIMEOUT, self.sm.rx().wait_pull()).await;

        self.cfg.clock_divider = divider(SLOT_US_PER_CYCLE);
        self.apply(INSTR_LABEL_START);

        let presence = sampled.map_err(|_| BusError::Timeout)? & 0x8000_0000 == 0;
        if !presence {
            warn!("No devices responded to 1W bus reset");
        }
        Ok(presence)
    }

    async fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        // read-back bits are only meaningful where we wrote 1s
        self.exchange(8, byte as u32).await.map(|_| ())
    }

    async fn read_byte(&mut self) -> Result<u8, BusError> {
        Ok(self.exchange(8, 0xff).await? as u8)
    }

    async fn triplet(&mut self, direction: bool) -> Result<Triplet, BusError> {
        let bits = self.exchange(2, 0b11).await?;
        let id_bit = bits & 0b01 != 0;
        let cmp_id_bit = bits & 0b10 != 0;
        let direction = triplet_direction(id_bit, cmp_id_bit, direction);
        self.exchange(1, direction as u32).await?;
        Ok(Triplet {
            id_bit,
            cmp_id_bit,
            direction,
        })
    }
}
