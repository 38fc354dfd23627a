//! A single-register, transmit-only 16550-lite UART: the one MMIO
//! peripheral this workspace ships.

use std::io::Write;

use rv32ima_core::memory::HostBus;
use tracing::warn;

/// Conventional mini-rv32ima-derived UART addresses: a status register
/// that always reports "transmitter ready", and a data register whose
/// low byte is written straight to the host's stdout.
pub const UART_TX_DATA: u32 = 0x1000_0000;
pub const UART_TX_READY: u32 = 0x1000_0005;

/// Transmitter-always-ready bit, reported at [`UART_TX_READY`].
const LSR_THR_EMPTY: u32 = 0x20;

/// The one concrete [`HostBus`] this host ships. Unrecognized MMIO
/// addresses and CSR numbers are not guest bugs worth crashing the
/// host over: they are logged and answered permissively.
#[derive(Debug, Default)]
pub struct ConsoleUart {
    stdout: std::io::Stdout,
}

impl ConsoleUart {
    pub fn new() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }
}

impl HostBus for ConsoleUart {
    fn mmio_load(&mut self, _v_proc_address: u32, addr: u32) -> u32 {
        match addr {
            UART_TX_READY => LSR_THR_EMPTY,
            _ => {
                warn!(addr, "load from unrecognized MMIO address");
                0
            }
        }
    }

    fn mmio_store(&mut self, _v_proc_address: u32, addr: u32, value: u32) {
        match addr {
            UART_TX_DATA => {
                let byte = [value as u8];
                let _ = self.stdout.write_all(&byte);
                let _ = self.stdout.flush();
            }
            _ => warn!(addr, value, "store to unrecognized MMIO address"),
        }
    }

    fn othercsr_read(&mut self, csrno: u16) -> u32 {
        warn!(csrno, "read of unrecognized CSR, answering zero");
        0
    }

    fn othercsr_write(&mut self, csrno: u16, value: u32) {
        warn!(csrno, value, "write to unrecognized CSR, ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_ready_always_reports_empty() {
        let mut uart = ConsoleUart::new();
        assert_eq!(uart.mmio_load(0, UART_TX_READY), LSR_THR_EMPTY);
    }

    #[test]
    fn unrecognized_address_reads_as_zero() {
        let mut uart = ConsoleUart::new();
        assert_eq!(uart.mmio_load(0, 0x1000_1000), 0);
    }
}
