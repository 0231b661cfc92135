#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::{PIO0, UART0};
use embassy_rp::pio::{self, Pio};
use embassy_rp::uart::{self, Uart};
use embassy_time::{Delay, Duration, Timer};
use ascd_sensor_identify::pio_onewire::{PioOneWireMaster, PioOneWireMasterProgram};
use ascd_sensor_identify::uart_console::UartConsole;
use ascd_sensor_identify::{Ds18Bus, IdentifyConfig, Identifier};
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => pio::InterruptHandler<PIO0>;
    UART0_IRQ => uart::InterruptHandler<UART0>;
});

const BAUD: u32 = 115_200;

#[embassy_executor::main]
async fn main(_spawner: Spawner) -> ! {
    info!("hello.");

    let p = embassy_rp::init(Default::default());
    let Pio {
        mut common, sm0, ..
    } = Pio::new(p.PIO0, Irqs);

    let owmp = PioOneWireMasterProgram::<PIO0>::new(&mut common);
    let owm = PioOneWireMaster::<PIO0, 0>::new(&mut common, sm0, p.PIN_15, &owmp);

    let mut uart_cfg = uart::Config::default();
    uart_cfg.baudrate = BAUD;
    let uart = Uart::new(p.UART0, p.PIN_0, p.PIN_1, Irqs, p.DMA_CH0, p.DMA_CH1, uart_cfg);

    let bus = Ds18Bus::new(owm, Delay);
    let console = UartConsole::new(uart);

    match Identifier::new(bus, console, Delay, IdentifyConfig::default()) {
        Ok(mut identifier) => match identifier.run().await {
            Ok(cal) => info!("identified {} sensors", cal.sensors().len()),
            Err(e) => error!("identification stopped: {}", e),
        },
        Err(e) => error!("bad config: {}", e),
    }

    // Nothing left to do; reset the board to run again.
    loop {
        Timer::after(Duration::from_secs(10)).await;
    }
}
