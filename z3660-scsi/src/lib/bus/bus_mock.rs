use ahash::AHashMap;
use std::time::Duration;

use super::bus_interface::RegisterBus;
use super::bus_sim::DEFAULT_BUFFER_ADDRESS;
use crate::regs::Register;

/// Something the driver did to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Write(Register, u32),
    Read(Register),
    PreDma(usize),
    PostDma(usize),
    Wait,
    ToScratch(usize),
    FromScratch(usize),
}

/// A register file that never moves data, recording every access.
/// Values can be set globally or for a particular selected unit.
pub struct MockBus {
    values: AHashMap<Register, u32>,
    unit_values: AHashMap<(u32, Register), u32>,
    select: u32,
    select_x: u32,
    scratch: Vec<u8>,
    buffer_address: u32,
    hung: bool,
    events: Vec<BusEvent>,
}

impl MockBus {
    pub fn new() -> Self {
        MockBus {
            values: AHashMap::new(),
            unit_values: AHashMap::new(),
            select: 0,
            select_x: 0,
            scratch: vec![0; 4096],
            buffer_address: DEFAULT_BUFFER_ADDRESS,
            hung: false,
            events: Vec::new(),
        }
    }

    pub fn set(&mut self, reg: Register, value: u32) {
        self.values.insert(reg, value);
    }

    /// Set a value seen only while `unit` is selected.
    pub fn set_for_unit(&mut self, unit: u32, reg: Register, value: u32) {
        self.unit_values.insert((unit, reg), value);
    }

    pub fn set_buffer_address(&mut self, address: u32) {
        self.buffer_address = address;
    }

    /// Make every command miss its completion deadline.
    pub fn hang(&mut self) {
        self.hung = true;
    }

    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Number of register reads and writes so far.
    pub fn register_accesses(&self) -> usize {
        self.events.iter()
            .filter(|e| matches!(e, BusEvent::Write(..) | BusEvent::Read(_)))
            .count()
    }

    /// Values written to the given register, in order.
    pub fn writes_to(&self, reg: Register) -> Vec<u32> {
        self.events.iter()
            .filter_map(|e| match e {
                BusEvent::Write(r, value) if *r == reg => Some(*value),
                _ => None,
            })
            .collect()
    }
}

impl RegisterBus for MockBus {
    fn write_long(&mut self, offset: u32, value: u32) {
        let reg = Register::from_offset(offset).expect("Write to unknown register offset.");
        match reg {
            Register::SelectDrive => self.select = value,
            Register::SelectDriveX => self.select_x = value,
            _ => {}
        }
        self.events.push(BusEvent::Write(reg, value));
    }

    fn read_long(&mut self, offset: u32) -> u32 {
        let reg = Register::from_offset(offset).expect("Read from unknown register offset.");
        self.events.push(BusEvent::Read(reg));
        let unit = if reg == Register::BlockSize { self.select_x } else { self.select };
        self.unit_values.get(&(unit, reg))
            .or_else(|| self.values.get(&reg))
            .copied()
            .unwrap_or(0)
    }

    fn bus_address(&self, _buffer: &[u8]) -> u32 {
        self.buffer_address
    }

    fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    fn copy_to_scratch(&mut self, data: &[u8]) {
        self.events.push(BusEvent::ToScratch(data.len()));
        self.scratch[..data.len()].copy_from_slice(data);
    }

    fn copy_from_scratch(&mut self, data: &mut [u8]) {
        self.events.push(BusEvent::FromScratch(data.len()));
        data.copy_from_slice(&self.scratch[..data.len()]);
    }

    fn pre_dma(&mut self, buffer: &[u8]) {
        self.events.push(BusEvent::PreDma(buffer.len()));
    }

    fn post_dma(&mut self, buffer: &mut [u8]) {
        self.events.push(BusEvent::PostDma(buffer.len()));
    }

    fn wait_complete(&mut self, _timeout: Duration) -> bool {
        self.events.push(BusEvent::Wait);
        !self.hung
    }
}
