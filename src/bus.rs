use embassy_time::Timer;
use embedded_hal::spi::Operation;
use embedded_hal_async::spi::SpiDevice;

use crate::util::{slice8, slice8_mut};

/// Opaque transport failure. The driver treats the bus as all-or-nothing:
/// any failed transfer aborts the operation in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusError;

/// Chip-side function an access is addressed to.
///
/// Function 0 is the bus controller itself, function 1 the backplane
/// window, function 2 the WLAN data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Function {
    Bus = 0,
    Backplane = 1,
    Wlan = 2,
}

pub trait Bus {
    async fn read8(&mut self, func: Function, addr: u32) -> Result<u8, BusError>;
    async fn write8(&mut self, func: Function, addr: u32, val: u8) -> Result<(), BusError>;
    async fn read32(&mut self, func: Function, addr: u32) -> Result<u32, BusError>;
    async fn write32(&mut self, func: Function, addr: u32, val: u32) -> Result<(), BusError>;
    /// Reads the next inbound WLAN frame into `buf`, returning its length in bytes.
    /// Returns `Ok(0)` when no frame is pending.
    async fn read_frame(&mut self, buf: &mut [u32]) -> Result<usize, BusError>;
    async fn write_frame(&mut self, buf: &[u32]) -> Result<(), BusError>;
    /// Resolves when the device signals pending work on the WLAN function.
    async fn wait_for_event(&mut self);
}

// gSPI status register, read on function 0.
const REG_STATUS: u32 = 0x08;
const STATUS_F2_PKT_AVAILABLE: u32 = 1 << 5;
const STATUS_F2_PKT_LEN_SHIFT: u32 = 9;
const STATUS_F2_PKT_LEN_MASK: u32 = 0x7FF;

fn cmd_word(write: bool, func: Function, addr: u32, len: u32) -> u32 {
    (write as u32) << 31 | 1 << 30 | (func as u32) << 28 | (addr & 0x1FFFF) << 11 | (len & 0x7FF)
}

/// Any gSPI-wired `SpiDevice` is usable as the chip bus directly.
impl<T: SpiDevice> Bus for T {
    async fn read8(&mut self, func: Function, addr: u32) -> Result<u8, BusError> {
        let cmd = cmd_word(false, func, addr, 1);
        let mut buf = [0u8; 1];
        self.transaction(&mut [
            Operation::Write(&cmd.to_le_bytes()),
            Operation::Read(&mut buf),
        ])
        .await
        .map_err(|_| BusError)?;
        Ok(buf[0])
    }

    async fn write8(&mut self, func: Function, addr: u32, val: u8) -> Result<(), BusError> {
        let cmd = cmd_word(true, func, addr, 1);
        self.transaction(&mut [Operation::Write(&cmd.to_le_bytes()), Operation::Write(&[val])])
            .await
            .map_err(|_| BusError)
    }

    async fn read32(&mut self, func: Function, addr: u32) -> Result<u32, BusError> {
        let cmd = cmd_word(false, func, addr, 4);
        let mut buf = [0u8; 4];
        self.transaction(&mut [
            Operation::Write(&cmd.to_le_bytes()),
            Operation::Read(&mut buf),
        ])
        .await
        .map_err(|_| BusError)?;
        Ok(u32::from_le_bytes(buf))
    }

    async fn write32(&mut self, func: Function, addr: u32, val: u32) -> Result<(), BusError> {
        let cmd = cmd_word(true, func, addr, 4);
        self.transaction(&mut [
            Operation::Write(&cmd.to_le_bytes()),
            Operation::Write(&val.to_le_bytes()),
        ])
        .await
        .map_err(|_| BusError)
    }

    async fn read_frame(&mut self, buf: &mut [u32]) -> Result<usize, BusError> {
        let status = self.read32(Function::Bus, REG_STATUS).await?;
        if status & STATUS_F2_PKT_AVAILABLE == 0 {
            return Ok(0);
        }
        let len = (status >> STATUS_F2_PKT_LEN_SHIFT & STATUS_F2_PKT_LEN_MASK) as usize;
        if len == 0 || len > buf.len() * 4 {
            return Err(BusError);
        }
        let words = (len + 3) / 4;
        let cmd = cmd_word(false, Function::Wlan, 0, len as u32);
        self.transaction(&mut [
            Operation::Write(&cmd.to_le_bytes()),
            Operation::Read(slice8_mut(&mut buf[..words])),
        ])
        .await
        .map_err(|_| BusError)?;
        Ok(len)
    }

    async fn write_frame(&mut self, buf: &[u32]) -> Result<(), BusError> {
        let cmd = cmd_word(true, Function::Wlan, 0, (buf.len() * 4) as u32);
        self.transaction(&mut [
            Operation::Write(&cmd.to_le_bytes()),
            Operation::Write(slice8(buf)),
        ])
        .await
        .map_err(|_| BusError)
    }

    async fn wait_for_event(&mut self) {
        // No irq line on plain gSPI, poll the status register instead.
        loop {
            if let Ok(status) = self.read32(Function::Bus, REG_STATUS).await {
                if status & STATUS_F2_PKT_AVAILABLE != 0 {
                    return;
                }
            }
            Timer::after_millis(1).await;
        }
    }
}
