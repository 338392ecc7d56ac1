//! Byte-offset block reads and writes, and the staged-or-direct transfer
//! sequence shared with the SCSI emulation.

use log::{debug, warn};

use crate::bus::RegisterBus;
use crate::error::{IoError, IoResult};
use crate::regs::{Register, RegisterWindow};
use crate::unit::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Whether a request carries a 32-bit or a 64-bit byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetWidth {
    Narrow,
    Wide,
}

/// One programmed transfer: which command register to store the unit into,
/// and what goes in the address registers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Transfer {
    pub direction: Direction,
    pub command: Register,
    pub address: u32,
    pub address_high: Option<u32>,
}

/// Program the address registers and run a transfer for the whole of
/// `buffer`. Buffers the controller cannot reach are staged through the
/// scratch window. After a read, `UsedDma` tells whether the data is
/// already in place or still sitting in scratch.
///
/// The controller only falls back to scratch for a reachable buffer when the
/// transfer fits the window. A read that breaks this has already run when
/// it is detected, and fails with `BadLength` without touching `buffer`.
pub(crate) fn run_transfer<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit_num: u8,
                                           transfer: Transfer, buffer: &mut [u8]) -> IoResult<()> {
    let bus_address = regs.bus_address(buffer);
    let staged = !regs.is_dma_reachable(bus_address);
    if staged && buffer.len() > regs.scratch_len() {
        debug!("Unit {}: {} byte transfer does not fit the scratch window.", unit_num, buffer.len());
        return Err(IoError::BadLength);
    }
    if staged && transfer.direction == Direction::Write {
        regs.stage_in(buffer)?;
    }

    regs.write_register(Register::Address, transfer.address);
    regs.write_register(Register::Length, buffer.len() as u32);
    regs.write_register(Register::BufferPointer, bus_address);
    if let Some(high) = transfer.address_high {
        regs.write_register(Register::AddressHigh, high);
    }
    regs.issue_dma_command(transfer.command, unit_num, buffer)?;

    if transfer.direction == Direction::Read && regs.read_register(Register::UsedDma) == 0 {
        if buffer.len() > regs.scratch_len() {
            warn!("Unit {}: controller staged a {} byte read that does not fit the scratch window.",
                  unit_num, buffer.len());
            return Err(IoError::BadLength);
        }
        regs.stage_out(buffer)?;
    }
    Ok(())
}

/// Read `length` bytes at byte `offset` into `buffer`. Returns the number
/// of bytes transferred.
pub fn read<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit, width: OffsetWidth,
                            offset: u64, buffer: Option<&mut [u8]>, length: u32) -> IoResult<u32> {
    transfer_bytes(regs, unit, Direction::Read, width, offset, buffer, length)
}

/// Write `length` bytes from `buffer` at byte `offset`. Returns the number
/// of bytes transferred.
pub fn write<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit, width: OffsetWidth,
                             offset: u64, buffer: Option<&mut [u8]>, length: u32) -> IoResult<u32> {
    transfer_bytes(regs, unit, Direction::Write, width, offset, buffer, length)
}

pub(crate) fn transfer_bytes<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit,
                                             direction: Direction, width: OffsetWidth, offset: u64,
                                             buffer: Option<&mut [u8]>, length: u32) -> IoResult<u32> {
    let buffer = buffer.ok_or(IoError::BadAddress)?;

    let block_size = regs.query_block_size(unit.unit_num);
    if length < block_size {
        debug!("Unit {}: {} bytes is less than a block.", unit.unit_num, length);
        return Err(IoError::BadLength);
    }
    let buffer = buffer.get_mut(..length as usize).ok_or(IoError::BadLength)?;

    let command = match (direction, width) {
        (Direction::Read, OffsetWidth::Narrow) => Register::ReadBytes,
        (Direction::Write, OffsetWidth::Narrow) => Register::WriteBytes,
        (Direction::Read, OffsetWidth::Wide) => Register::Read64,
        (Direction::Write, OffsetWidth::Wide) => Register::Write64,
    };
    let address_high = match width {
        OffsetWidth::Narrow if offset > u32::MAX as u64 => return Err(IoError::BadAddress),
        OffsetWidth::Narrow => None,
        OffsetWidth::Wide => Some((offset >> 32) as u32),
    };

    run_transfer(regs, unit.unit_num, Transfer {
        direction,
        command,
        address: offset as u32,
        address_high,
    }, buffer)?;
    Ok(length)
}
