//! The controller's register window and the sequences built directly on it.
//!
//! Every register is a 32-bit word at a fixed offset from the window base.
//! Storing a unit number into one of the command registers starts a
//! transfer using whatever the address registers hold at that moment.

use log::{trace, warn};
use std::time::Duration;

use crate::bus::RegisterBus;
use crate::config::DriverConfig;
use crate::error::{IoError, IoResult};

/// Board offset of the DMA staging window.
pub const SCRATCH_OFFSET: u32 = 0x8_0000;
/// Size of the DMA staging window.
pub const SCRATCH_SIZE: usize = 0x8_0000;

/// The controller registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Command: write `Length` bytes from the buffer to block `Address`.
    Write,
    /// Command: read `Length` bytes into the buffer from block `Address`.
    Read,
    /// Selects the unit for `DriveType`, `Blocks` and the geometry registers.
    SelectDrive,
    DriveType,
    Blocks,
    Cylinders,
    Heads,
    Sectors,
    /// Block number, byte offset, or low half of a 64-bit byte offset.
    Address,
    Length,
    /// Bus address of the data buffer.
    BufferPointer,
    /// High half of a 64-bit byte offset.
    AddressHigh,
    /// Command: 64-bit byte-offset write.
    Write64,
    /// Command: 64-bit byte-offset read.
    Read64,
    BlockSize,
    /// Command: 32-bit byte-offset read.
    ReadBytes,
    /// Command: 32-bit byte-offset write.
    WriteBytes,
    /// Selects the unit for `BlockSize`.
    SelectDriveX,
    /// Nonzero when the last read went straight into the caller's buffer.
    UsedDma,
}

impl Register {
    pub const ALL: [Register; 19] = [
        Register::Write, Register::Read, Register::SelectDrive, Register::DriveType,
        Register::Blocks, Register::Cylinders, Register::Heads, Register::Sectors,
        Register::Address, Register::Length, Register::BufferPointer, Register::AddressHigh,
        Register::Write64, Register::Read64, Register::BlockSize, Register::ReadBytes,
        Register::WriteBytes, Register::SelectDriveX, Register::UsedDma,
    ];

    /// Byte offset from the start of the register window.
    pub const fn offset(self) -> u32 {
        match self {
            Register::Write => 0x00,
            Register::Read => 0x04,
            Register::SelectDrive => 0x08,
            Register::DriveType => 0x0C,
            Register::Blocks => 0x10,
            Register::Cylinders => 0x14,
            Register::Heads => 0x18,
            Register::Sectors => 0x1C,
            Register::Address => 0x20,
            Register::Length => 0x24,
            Register::BufferPointer => 0x28,
            Register::AddressHigh => 0x2C,
            Register::Write64 => 0x50,
            Register::Read64 => 0x54,
            Register::BlockSize => 0x6C,
            Register::ReadBytes => 0x70,
            Register::WriteBytes => 0x74,
            Register::SelectDriveX => 0x78,
            Register::UsedDma => 0x80,
        }
    }

    pub fn from_offset(offset: u32) -> Option<Register> {
        Register::ALL.iter().copied().find(|reg| reg.offset() == offset)
    }

    /// True for the registers whose store starts a transfer.
    pub fn is_command(self) -> bool {
        matches!(self, Register::Write | Register::Read | Register::Write64 | Register::Read64
            | Register::ReadBytes | Register::WriteBytes)
    }
}

/// Typed access to a controller through some `RegisterBus`.
pub struct RegisterWindow<B> {
    bus: B,
    timeout: Duration,
    dma_limit: u32,
}

impl<B: RegisterBus> RegisterWindow<B> {
    pub fn new(bus: B, config: &DriverConfig) -> Self {
        RegisterWindow {
            bus,
            timeout: config.completion_timeout,
            dma_limit: config.dma_limit,
        }
    }

    pub fn write_register(&mut self, reg: Register, value: u32) {
        trace!("{:?} <- {:#010X}", reg, value);
        self.bus.write_long(reg.offset(), value);
    }

    pub fn read_register(&mut self, reg: Register) -> u32 {
        let value = self.bus.read_long(reg.offset());
        trace!("{:?} -> {:#010X}", reg, value);
        value
    }

    /// Flush the buffer from the CPU cache, start the transfer, wait for it,
    /// then invalidate the buffer so the CPU sees what the controller wrote.
    pub fn issue_dma_command(&mut self, command: Register, unit_num: u8,
                             buffer: &mut [u8]) -> IoResult<()> {
        debug_assert!(command.is_command());
        self.bus.pre_dma(buffer);
        self.write_register(command, unit_num as u32);
        let finished = self.bus.wait_complete(self.timeout);
        self.bus.post_dma(buffer);
        if finished {
            Ok(())
        } else {
            warn!("Unit {}: {:?} did not complete within {:?}.", unit_num, command, self.timeout);
            Err(IoError::Timeout)
        }
    }

    /// Current block size of a unit, in bytes.
    pub fn query_block_size(&mut self, unit_num: u8) -> u32 {
        self.write_register(Register::SelectDriveX, unit_num as u32);
        self.read_register(Register::BlockSize)
    }

    /// Current number of blocks on a unit.
    pub fn query_block_count(&mut self, scsi_num: u16) -> u32 {
        self.write_register(Register::SelectDrive, scsi_num as u32);
        self.read_register(Register::Blocks)
    }

    /// The address the controller will see for this buffer.
    pub fn bus_address(&self, buffer: &[u8]) -> u32 {
        self.bus.bus_address(buffer)
    }

    /// Whether the controller can reach this bus address by DMA.
    pub fn is_dma_reachable(&self, address: u32) -> bool {
        address >= self.dma_limit
    }

    pub fn scratch_len(&self) -> usize {
        self.bus.scratch_len()
    }

    /// Copy outgoing data into the scratch window.
    pub fn stage_in(&mut self, data: &[u8]) -> IoResult<()> {
        if data.len() > self.bus.scratch_len() {
            return Err(IoError::BadLength);
        }
        self.bus.copy_to_scratch(data);
        Ok(())
    }

    /// Copy incoming data out of the scratch window.
    pub fn stage_out(&mut self, data: &mut [u8]) -> IoResult<()> {
        if data.len() > self.bus.scratch_len() {
            return Err(IoError::BadLength);
        }
        self.bus.copy_from_scratch(data);
        Ok(())
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bus::{BusEvent, MockBus};

    fn window() -> RegisterWindow<MockBus> {
        RegisterWindow::new(MockBus::new(), &DriverConfig::default())
    }

    #[test]
    fn test_offsets_are_distinct_and_aligned() {
        for (i, a) in Register::ALL.iter().enumerate() {
            assert_eq!(a.offset() % 4, 0);
            assert_eq!(Register::from_offset(a.offset()), Some(*a));
            for b in &Register::ALL[i + 1..] {
                assert_ne!(a.offset(), b.offset());
            }
        }
        assert_eq!(Register::from_offset(0x30), None);
    }

    #[test]
    fn test_write_then_read_register() {
        let mut regs = window();
        regs.bus_mut().set(Register::Blocks, 1234);
        regs.write_register(Register::Address, 0xCAFE);
        assert_eq!(regs.read_register(Register::Blocks), 1234);
        assert_eq!(regs.bus().events(), &[
            BusEvent::Write(Register::Address, 0xCAFE),
            BusEvent::Read(Register::Blocks),
        ]);
    }

    #[test]
    fn test_dma_command_ordering() {
        crate::init_test_logging();
        let mut regs = window();
        let mut buf = [0u8; 16];
        regs.issue_dma_command(Register::Read, 3, &mut buf).unwrap();
        assert_eq!(regs.bus().events(), &[
            BusEvent::PreDma(16),
            BusEvent::Write(Register::Read, 3),
            BusEvent::Wait,
            BusEvent::PostDma(16),
        ]);
    }

    #[test]
    fn test_dma_command_timeout() {
        let mut regs = window();
        regs.bus_mut().hang();
        let mut buf = [0u8; 4];
        assert_eq!(regs.issue_dma_command(Register::Write, 0, &mut buf), Err(IoError::Timeout));
        // The cache is still invalidated on the way out.
        assert_eq!(regs.bus().events().last(), Some(&BusEvent::PostDma(4)));
    }

    #[test]
    fn test_unit_queries_use_their_own_select() {
        let mut regs = window();
        regs.bus_mut().set(Register::BlockSize, 512);
        regs.bus_mut().set(Register::Blocks, 99);
        assert_eq!(regs.query_block_size(2), 512);
        assert_eq!(regs.query_block_count(5), 99);
        assert_eq!(regs.bus().events(), &[
            BusEvent::Write(Register::SelectDriveX, 2),
            BusEvent::Read(Register::BlockSize),
            BusEvent::Write(Register::SelectDrive, 5),
            BusEvent::Read(Register::Blocks),
        ]);
    }

    #[test]
    fn test_staging_bounds() {
        let mut regs = window();
        let scratch = regs.scratch_len();
        assert_eq!(regs.stage_in(&vec![0; scratch + 1]), Err(IoError::BadLength));
        assert_eq!(regs.stage_out(&mut vec![0; scratch + 1]), Err(IoError::BadLength));
        regs.stage_in(&[1, 2, 3]).unwrap();
        let mut back = [0; 3];
        regs.stage_out(&mut back).unwrap();
        assert_eq!(back, [1, 2, 3]);
    }

    #[test]
    fn test_dma_reachability() {
        let regs = window();
        assert!(!regs.is_dma_reachable(0x0000_1000));
        assert!(!regs.is_dma_reachable(0x07FF_FFFF));
        assert!(regs.is_dma_reachable(0x0800_0000));
        assert!(regs.is_dma_reachable(0x4000_0000));
    }
}
