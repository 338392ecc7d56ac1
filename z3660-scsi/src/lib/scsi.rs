//! Emulation of a direct-access SCSI disk on top of the register protocol.
//!
//! Only the handful of commands a filesystem or partitioning tool issues
//! are understood. Data transfers go through the same staged-or-direct
//! sequence as plain block I/O.

use log::debug;
use z3660_utils::read_be::ReadBE;
use z3660_utils::write_be::WriteBE;

use crate::blockio::{self, Direction, Transfer};
use crate::bus::RegisterBus;
use crate::error::{IoError, IoResult};
use crate::regs::{Register, RegisterWindow};
use crate::unit::Unit;

/// Operation codes understood by the emulation.
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const READ_DEFECT_DATA_10: u8 = 0x37;
    pub const CHANGE_DEFINITION: u8 = 0x40;
}

pub const INQUIRY_LEN: usize = 44;
pub const CAPACITY_LEN: usize = 8;
pub const MODE_SENSE_LEN: usize = 34;

/// Vendor, product and revision fields of the INQUIRY data.
pub const INQUIRY_ID: &[u8; 36] = b"Z3660    SCSI Disk      0.1 11111111";

/// Rotation rate reported in the rigid geometry page.
pub const ROTATION_RATE: u16 = 5400;

/// Transfer lengths are counted in 512-byte sectors whatever the unit's
/// block size.
const SECTOR_SHIFT: u32 = 9;

const MIN_CDB_LEN: usize = 6;
const LONG_CDB_LEN: usize = 10;

/// A SCSI command as passed in an `HD_SCSICMD` request.
#[derive(Debug, Default)]
pub struct ScsiCmd<'a> {
    pub command: Option<&'a [u8]>,
    pub cmd_length: u16,
    pub data: Option<&'a mut [u8]>,
    /// Bytes of `data` actually used.
    pub actual: u32,
}

impl<'a> ScsiCmd<'a> {
    pub fn new(cdb: &'a [u8], data: Option<&'a mut [u8]>) -> Self {
        ScsiCmd {
            command: Some(cdb),
            cmd_length: cdb.len() as u16,
            data,
            actual: 0,
        }
    }
}

/// Start block and block count of a READ or WRITE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub block: u32,
    pub count: u32,
}

/// Decode a READ(6) or WRITE(6) CDB. A count of zero means 256 blocks.
pub fn decode_rw6(cdb: &[u8]) -> BlockRange {
    let count = match cdb[4] {
        0 => 256,
        n => n as u32,
    };
    BlockRange {
        block: cdb.be_u24_at(1) & 0x1F_FFFF,
        count,
    }
}

/// Decode a READ(10) or WRITE(10) CDB.
pub fn decode_rw10(cdb: &[u8]) -> BlockRange {
    BlockRange {
        block: cdb.be_u32_at(2),
        count: cdb.be_u16_at(7) as u32,
    }
}

/// The mode pages MODE SENSE can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePage {
    FormatDevice,
    RigidGeometry,
}

impl ModePage {
    /// Pick the page out of bytes 2..4 of a MODE SENSE CDB.
    pub fn from_cdb(cdb: &[u8]) -> Option<ModePage> {
        match cdb.be_u16_at(2) {
            0x0300 => Some(ModePage::FormatDevice),
            0x0400 => Some(ModePage::RigidGeometry),
            _ => None,
        }
    }
}

pub fn inquiry_response() -> [u8; INQUIRY_LEN] {
    let mut out = [0u8; INQUIRY_LEN];
    out[1] = 0x80;  // Removable.
    out[3] = 2;
    out[4] = (INQUIRY_LEN - 4) as u8;
    out[8..].copy_from_slice(INQUIRY_ID);
    out
}

pub fn capacity_response(blocks: u32, block_size: u32) -> [u8; CAPACITY_LEN] {
    let mut out = [0u8; CAPACITY_LEN];
    out.put_be_u32_at(0, blocks.wrapping_sub(1));
    out.put_be_u32_at(4, block_size);
    out
}

/// Mode parameter header, one block descriptor, then the chosen page.
pub fn mode_sense_response(page: ModePage, blocks: u32, block_size: u32,
                           unit: &Unit) -> [u8; MODE_SENSE_LEN] {
    let mut out = [0u8; MODE_SENSE_LEN];
    out[0] = (MODE_SENSE_LEN - 1) as u8;
    out[3] = 8;
    out.put_be_u32_at(4, blocks.wrapping_sub(1) & 0xFF_FFFF);
    out.put_be_u32_at(8, block_size);

    let page_data = &mut out[12..];
    page_data[1] = 0x16;
    match page {
        ModePage::FormatDevice => {
            page_data[0] = 0x03;
            page_data[3] = 0x01;
            page_data.put_be_u16_at(10, unit.sectors_per_track as u16);
            page_data.put_be_u16_at(12, block_size as u16);
            page_data[15] = 0x01;
            page_data[20] = 0x80;
        }
        ModePage::RigidGeometry => {
            page_data[0] = 0x04;
            page_data[2] = (unit.cylinders >> 16) as u8;
            page_data[3] = (unit.cylinders >> 8) as u8;
            page_data[4] = unit.cylinders as u8;
            page_data[5] = unit.heads as u8;
            page_data.put_be_u32_at(13, unit.cylinders);
            page_data.put_be_u16_at(20, ROTATION_RATE);
        }
    }
    out
}

/// Run one SCSI command against a unit. `cmd.actual` is always rewritten:
/// the response length on success, zero on any error.
pub fn execute<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit,
                               cmd: &mut ScsiCmd) -> IoResult<()> {
    cmd.actual = 0;
    match dispatch(regs, unit, cmd) {
        Ok(actual) => {
            cmd.actual = actual;
            Ok(())
        }
        Err(e) => {
            debug!("Unit {}: SCSI command failed: {}", unit.unit_num, e);
            Err(e)
        }
    }
}

fn dispatch<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit,
                            cmd: &mut ScsiCmd) -> IoResult<u32> {
    let cmd_length = cmd.cmd_length as usize;
    if cmd_length < MIN_CDB_LEN {
        return Err(IoError::BadLength);
    }
    let cdb = cmd.command.ok_or(IoError::BadAddress)?;
    let cdb = cdb.get(..cmd_length).ok_or(IoError::BadLength)?;
    let data = cmd.data.as_deref_mut();
    debug!("Unit {}: SCSI {:#04X}", unit.unit_num, cdb[0]);

    match cdb[0] {
        opcode::TEST_UNIT_READY => Ok(0),
        opcode::INQUIRY => {
            let data = data.ok_or(IoError::BadAddress)?;
            let n = data.len().min(INQUIRY_LEN);
            data[..n].copy_from_slice(&inquiry_response()[..n]);
            Ok(n as u32)
        }
        opcode::READ_6 => read_write(regs, unit, Direction::Read, decode_rw6(cdb), data),
        opcode::WRITE_6 => read_write(regs, unit, Direction::Write, decode_rw6(cdb), data),
        opcode::READ_10 | opcode::WRITE_10 => {
            if cdb.len() < LONG_CDB_LEN {
                return Err(IoError::BadStatus);
            }
            let direction = if cdb[0] == opcode::READ_10 { Direction::Read } else { Direction::Write };
            read_write(regs, unit, direction, decode_rw10(cdb), data)
        }
        opcode::READ_CAPACITY_10 => {
            if cdb.len() < LONG_CDB_LEN {
                return Err(IoError::BadStatus);
            }
            let data = data.ok_or(IoError::BadAddress)?;
            if data.len() < CAPACITY_LEN {
                return Err(IoError::BadLength);
            }
            let block_size = regs.query_block_size(unit.unit_num);
            let blocks = regs.query_block_count(unit.scsi_num);
            data[..CAPACITY_LEN].copy_from_slice(&capacity_response(blocks, block_size));
            Ok(CAPACITY_LEN as u32)
        }
        opcode::MODE_SENSE_6 => {
            let page = ModePage::from_cdb(cdb).ok_or(IoError::BadStatus)?;
            let data = data.ok_or(IoError::BadAddress)?;
            if data.len() < MODE_SENSE_LEN {
                return Err(IoError::BadLength);
            }
            let block_size = regs.query_block_size(unit.unit_num);
            let blocks = regs.query_block_count(unit.scsi_num);
            data[..MODE_SENSE_LEN]
                .copy_from_slice(&mode_sense_response(page, blocks, block_size, unit));
            Ok(MODE_SENSE_LEN as u32)
        }
        opcode::READ_DEFECT_DATA_10 | opcode::CHANGE_DEFINITION => Ok(0),
        other => {
            debug!("Unit {}: SCSI command {:#04X} is not emulated.", unit.unit_num, other);
            Err(IoError::BadStatus)
        }
    }
}

fn read_write<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit, direction: Direction,
                              range: BlockRange, data: Option<&mut [u8]>) -> IoResult<u32> {
    let max = regs.query_block_count(unit.scsi_num);
    if range.block > max || range.block as u64 + range.count as u64 > max as u64 {
        debug!("Unit {}: blocks {}+{} beyond {}.", unit.unit_num, range.block, range.count, max);
        return Err(IoError::BadAddress);
    }
    let data = data.ok_or(IoError::BadAddress)?;
    let len = (range.count as usize) << SECTOR_SHIFT;
    let buffer = data.get_mut(..len).ok_or(IoError::BadLength)?;
    if len == 0 {
        return Ok(0);
    }

    let command = match direction {
        Direction::Read => Register::Read,
        Direction::Write => Register::Write,
    };
    blockio::run_transfer(regs, unit.unit_num, Transfer {
        direction,
        command,
        address: range.block,
        address_high: None,
    }, buffer)?;
    Ok(len as u32)
}
