//! UART console adapter
//!
//! Implements [`Console`] over an RP2040 UART in async (DMA) mode, for use
//! with any serial terminal at the configured baud rate.

use embassy_rp::uart::{Async, Instance, Uart};
use embassy_time::{with_timeout, Duration};

use crate::console::Console;
use crate::error::ConsoleError;

/// Keys arriving closer together than this count as one press.
const DRAIN_QUIET: Duration = Duration::from_millis(50);

/// UART console adapter
pub struct UartConsole<'d, T: Instance> {
    uart: Uart<'d, T, Async>,
}

impl<'d, T: Instance> UartConsole<'d, T> {
    pub fn new(uart: Uart<'d, T, Async>) -> Self {
        Self { uart }
    }

    pub fn uart_mut(&mut self) -> &mut Uart<'d, T, Async> {
        &mut self.uart
    }

    /// Throw away input until the line goes quiet. Terminals send CR LF on
    /// enter, and escape sequences for arrow keys.
    async fn drain(&mut self) {
        let mut byte = [0u8; 1];
        while let Ok(Ok(())) = with_timeout(DRAIN_QUIET, self.uart.read(&mut byte)).await {
            trace!("drained {:x}", byte[0]);
        }
    }
}

impl<'d, T: Instance> Console for UartConsole<'d, T> {
    async fn write_str(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.uart.write(text.as_bytes()).await.map_err(|e| {
            error!("uart write failed: {}", e);
            ConsoleError::WriteFailed
        })
    }

    async fn wait_for_key(&mut self) -> Result<(), ConsoleError> {
        let mut byte = [0u8; 1];
        self.uart.read(&mut byte).await.map_err(|e| {
            error!("uart read failed: {}", e);
            ConsoleError::ReadFailed
        })?;
        debug!("key {:x}", byte[0]);
        self.drain().await;
        Ok(())
    }
}
