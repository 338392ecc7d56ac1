use log::{debug, info, warn};
use std::sync::{Arc, Mutex, mpsc::{self, Receiver, RecvTimeoutError, Sender}};
use std::thread;
use std::time::{Duration, Instant};

use super::bus_interface::RegisterBus;
use crate::config::DEFAULT_DMA_LIMIT;
use crate::regs::{Register, SCRATCH_SIZE};
use crate::store::BlockStore;
use crate::unit::NUM_UNITS;

/// Bus address reported for caller buffers unless the builder says otherwise.
/// It is above the DMA limit, so transfers go straight to the caller.
pub const DEFAULT_BUFFER_ADDRESS: u32 = 0x4000_0000;

const DEFAULT_HEADS: u32 = 16;
const DEFAULT_SECTORS: u32 = 63;
const DRIVE_TYPE_DISK: u32 = 1;

/// How a command interprets the `Address` register.
#[derive(Debug, Clone, Copy)]
enum Addressing {
    Block,
    Byte,
    Byte64,
}

/// The address registers as they stood when a command was issued.
#[derive(Debug, Clone, Copy, Default)]
struct AddressRegs {
    address: u32,
    length: u32,
    buffer_pointer: u32,
    address_high: u32,
}

/// Commands that can be sent to the controller thread.
enum SimCommand {
    Read {
        unit: u32,
        addressing: Addressing,
        regs: AddressRegs,
    },
    Write {
        unit: u32,
        addressing: Addressing,
        regs: AddressRegs,
        /// The caller's buffer as the controller sees it.
        visible: Vec<u8>,
    },
    JoinThread,
}

struct SimUnit {
    store: Box<dyn BlockStore>,
    block_size: u32,
    cylinders: u32,
    heads: u32,
    sectors: u32,
}

impl SimUnit {
    fn blocks(&self) -> u32 {
        u32::try_from(self.store.size() / self.block_size as u64).unwrap_or(u32::MAX)
    }
}

/// Data that is shared between the worker and driver threads.
struct SharedData {
    units: Vec<Option<SimUnit>>,
    scratch: Vec<u8>,
    used_dma: u32,
    /// Data read by direct DMA, tagged with the command that read it. It lands
    /// in the caller's buffer at `post_dma`.
    direct: Option<(u64, Vec<u8>)>,
}

/// A controller implemented in software, serving units from `BlockStore`s.
/// Commands run on a worker thread, so completion is asynchronous just as
/// it is on the board.
pub struct SimulatedController {
    worker_tx: Sender<(u64, SimCommand)>,
    done_rx: Receiver<u64>,
    worker_thread: Option<thread::JoinHandle<()>>,
    shared_data: Arc<Mutex<SharedData>>,
    select: u32,
    select_x: u32,
    address: AddressRegs,
    buffer_address: u32,
    visible: Vec<u8>,
    /// Sequence number of the last command issued.
    issued: u64,
    /// Sequence number of the last command known to have completed.
    completed: u64,
}

pub struct SimulatedControllerBuilder {
    units: Vec<Option<SimUnit>>,
    buffer_address: u32,
    completion_delay: Duration,
}

impl SimulatedController {
    pub fn builder() -> SimulatedControllerBuilder {
        SimulatedControllerBuilder {
            units: (0..NUM_UNITS).map(|_| None).collect(),
            buffer_address: DEFAULT_BUFFER_ADDRESS,
            completion_delay: Duration::ZERO,
        }
    }

    fn send(&mut self, cmd: SimCommand) {
        if self.worker_tx.send((self.issued + 1, cmd)).is_ok() {
            self.issued += 1;
        } else {
            warn!("Simulated controller worker has exited.");
        }
    }
}

impl SimulatedControllerBuilder {
    /// Attach a store as a unit, with a default geometry of 16 heads and 63
    /// sectors per track. Panics if the unit number is out of range or the
    /// block size is zero.
    pub fn unit(mut self, index: usize, store: impl BlockStore + 'static, block_size: u32) -> Self {
        assert!(index < NUM_UNITS, "Unit {} is out of range.", index);
        assert!(block_size > 0, "Block size must be nonzero.");
        let blocks = store.size() / block_size as u64;
        let cylinders = (blocks / (DEFAULT_HEADS * DEFAULT_SECTORS) as u64).max(1);
        self.units[index] = Some(SimUnit {
            store: Box::new(store),
            block_size,
            cylinders: u32::try_from(cylinders).unwrap_or(u32::MAX),
            heads: DEFAULT_HEADS,
            sectors: DEFAULT_SECTORS,
        });
        self
    }

    /// Override the geometry of an attached unit. Panics if there is none.
    pub fn geometry(mut self, index: usize, cylinders: u32, heads: u32, sectors: u32) -> Self {
        let unit = self.units.get_mut(index).and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("Unit {} has no store attached.", index));
        unit.cylinders = cylinders;
        unit.heads = heads;
        unit.sectors = sectors;
        self
    }

    /// The bus address the controller sees for every caller buffer.
    pub fn buffer_address(mut self, address: u32) -> Self {
        self.buffer_address = address;
        self
    }

    /// How long each command takes to complete.
    pub fn completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    /// Start the controller thread.
    pub fn build(self) -> SimulatedController {
        let present = self.units.iter().filter(|unit| unit.is_some()).count();
        info!("Simulated controller starting with {} unit(s).", present);

        let shared_data = Arc::new(Mutex::new(SharedData {
            units: self.units,
            scratch: vec![0; SCRATCH_SIZE],
            used_dma: 0,
            direct: None,
        }));

        let (worker_tx, worker_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let worker_shared_data = Arc::clone(&shared_data);
        let delay = self.completion_delay;

        let worker_thread = thread::spawn(move || loop {
            // Get the next command.
            let (seq, cmd) = match worker_rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => return,
            };
            // Check for thread join.
            if let SimCommand::JoinThread = cmd {
                return;
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            worker_iteration(&worker_shared_data, seq, cmd);
            if done_tx.send(seq).is_err() {
                return;
            }
        });

        SimulatedController {
            worker_tx,
            done_rx,
            worker_thread: Some(worker_thread),
            shared_data,
            select: 0,
            select_x: 0,
            address: AddressRegs::default(),
            buffer_address: self.buffer_address,
            visible: Vec::new(),
            issued: 0,
            completed: 0,
        }
    }
}

impl Drop for SimulatedController {
    fn drop(&mut self) {
        // A worker that already exited has nothing left to join.
        let _ = self.worker_tx.send((0, SimCommand::JoinThread));
        if let Some(worker_thread) = self.worker_thread.take() {
            if worker_thread.join().is_err() {
                warn!("Simulated controller worker panicked.");
            }
        }
        info!("Simulated controller stopping.");
    }
}

impl RegisterBus for SimulatedController {
    fn write_long(&mut self, offset: u32, value: u32) {
        let reg = match Register::from_offset(offset) {
            Some(reg) => reg,
            None => {
                debug!("Write to unknown register offset {:#X} ignored.", offset);
                return;
            }
        };
        let regs = self.address;
        match reg {
            Register::SelectDrive => self.select = value,
            Register::SelectDriveX => self.select_x = value,
            Register::Address => self.address.address = value,
            Register::Length => self.address.length = value,
            Register::BufferPointer => self.address.buffer_pointer = value,
            Register::AddressHigh => self.address.address_high = value,
            Register::Read => self.send(SimCommand::Read {
                unit: value, addressing: Addressing::Block, regs }),
            Register::ReadBytes => self.send(SimCommand::Read {
                unit: value, addressing: Addressing::Byte, regs }),
            Register::Read64 => self.send(SimCommand::Read {
                unit: value, addressing: Addressing::Byte64, regs }),
            Register::Write | Register::WriteBytes | Register::Write64 => {
                let addressing = match reg {
                    Register::Write => Addressing::Block,
                    Register::WriteBytes => Addressing::Byte,
                    _ => Addressing::Byte64,
                };
                let visible = std::mem::take(&mut self.visible);
                self.send(SimCommand::Write { unit: value, addressing, regs, visible });
            }
            _ => debug!("Write to read-only register {:?} ignored.", reg),
        }
    }

    fn read_long(&mut self, offset: u32) -> u32 {
        let reg = match Register::from_offset(offset) {
            Some(reg) => reg,
            None => {
                debug!("Read from unknown register offset {:#X}.", offset);
                return 0;
            }
        };
        let sd = self.shared_data.lock().unwrap();
        let unit = |index: u32| sd.units.get(index as usize).and_then(Option::as_ref);
        match reg {
            Register::DriveType => unit(self.select).map_or(0, |_| DRIVE_TYPE_DISK),
            Register::Blocks => unit(self.select).map_or(0, SimUnit::blocks),
            Register::Cylinders => unit(self.select).map_or(0, |u| u.cylinders),
            Register::Heads => unit(self.select).map_or(0, |u| u.heads),
            Register::Sectors => unit(self.select).map_or(0, |u| u.sectors),
            Register::BlockSize => unit(self.select_x).map_or(0, |u| u.block_size),
            Register::UsedDma => sd.used_dma,
            Register::SelectDrive => self.select,
            Register::SelectDriveX => self.select_x,
            Register::Address => self.address.address,
            Register::Length => self.address.length,
            Register::BufferPointer => self.address.buffer_pointer,
            Register::AddressHigh => self.address.address_high,
            _ => 0,
        }
    }

    fn bus_address(&self, _buffer: &[u8]) -> u32 {
        self.buffer_address
    }

    fn scratch_len(&self) -> usize {
        SCRATCH_SIZE
    }

    fn copy_to_scratch(&mut self, data: &[u8]) {
        let scratch = &mut self.shared_data.lock().unwrap().scratch;
        let n = data.len().min(scratch.len());
        scratch[..n].copy_from_slice(&data[..n]);
    }

    fn copy_from_scratch(&mut self, data: &mut [u8]) {
        let scratch = &self.shared_data.lock().unwrap().scratch;
        let n = data.len().min(scratch.len());
        data[..n].copy_from_slice(&scratch[..n]);
    }

    fn pre_dma(&mut self, buffer: &[u8]) {
        self.visible.clear();
        self.visible.extend_from_slice(buffer);
    }

    fn post_dma(&mut self, buffer: &mut [u8]) {
        match self.shared_data.lock().unwrap().direct.take() {
            Some((seq, data)) if seq == self.issued => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
            }
            Some((seq, _)) => debug!("Discarding data read by abandoned command {}.", seq),
            None => {}
        }
    }

    fn wait_complete(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        // Completions arrive in order, so late ones from abandoned commands
        // are passed over here.
        while self.completed < self.issued {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(seq) => self.completed = seq,
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Simulated controller worker has exited.");
                    return false;
                }
            }
        }
        true
    }
}

/// Carry out a single transfer.
fn worker_iteration(shared_data: &Mutex<SharedData>, seq: u64, cmd: SimCommand) {
    let mut sd = shared_data.lock().unwrap();
    let SharedData { units, scratch, used_dma, direct } = &mut *sd;

    let (unit_num, addressing, regs, visible) = match cmd {
        SimCommand::Read { unit, addressing, regs } => (unit, addressing, regs, None),
        SimCommand::Write { unit, addressing, regs, visible } =>
            (unit, addressing, regs, Some(visible)),
        SimCommand::JoinThread => unreachable!(),  // Already checked earlier.
    };
    let unit = match units.get_mut(unit_num as usize).and_then(Option::as_mut) {
        Some(unit) => unit,
        None => {
            debug!("Transfer addressed to absent unit {}.", unit_num);
            return;
        }
    };

    let offset = match addressing {
        Addressing::Block => regs.address as u64 * unit.block_size as u64,
        Addressing::Byte => regs.address as u64,
        Addressing::Byte64 => (regs.address_high as u64) << 32 | regs.address as u64,
    };
    let len = regs.length as usize;
    let direct_dma = regs.buffer_pointer >= DEFAULT_DMA_LIMIT;

    match visible {
        None => {
            let mut data = vec![0; len];
            if let Err(e) = unit.store.read_at(offset, &mut data) {
                debug!("Unit {} read of {} bytes at {:#X} failed: {}", unit_num, len, offset, e);
            }
            if direct_dma {
                *direct = Some((seq, data));
                *used_dma = 1;
            } else {
                let n = len.min(scratch.len());
                scratch[..n].copy_from_slice(&data[..n]);
                *used_dma = 0;
            }
        }
        Some(visible) => {
            let source = if direct_dma {
                visible
            } else {
                scratch[..len.min(scratch.len())].to_vec()
            };
            let n = len.min(source.len());
            if let Err(e) = unit.store.write_at(offset, &source[..n]) {
                debug!("Unit {} write of {} bytes at {:#X} failed: {}", unit_num, n, offset, e);
            }
        }
    }
}
