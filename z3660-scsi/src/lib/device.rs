use log::{debug, info};
use std::sync::{Arc, Mutex, PoisonError};

use crate::blockio::{self, Direction, OffsetWidth};
use crate::bus::RegisterBus;
use crate::config::DriverConfig;
use crate::error::{IoError, IoResult};
use crate::query;
use crate::regs::RegisterWindow;
use crate::request::{Command, DriveGeometry, IoData, IoRequest, DEVICE_DIRECT_ACCESS, MEMF_PUBLIC};
use crate::scsi;
use crate::unit::{Unit, UnitRegistry};

/// Where a command is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    NoOp,
    Unhandled,
    BlockIo(Direction, OffsetWidth),
    Scsi,
    Geometry,
    DriveType,
    ChangeNum,
    Motor,
    ProtStatus,
    DeviceQuery,
}

/// The command routing table.
pub fn route(command: Command) -> Route {
    use Direction::*;
    use OffsetWidth::*;
    match command {
        Command::Read => Route::BlockIo(Read, Narrow),
        Command::Read64 | Command::NsRead64 => Route::BlockIo(Read, Wide),
        Command::Write | Command::Format => Route::BlockIo(Write, Narrow),
        Command::Write64 | Command::NsWrite64 | Command::Format64 | Command::NsFormat64 =>
            Route::BlockIo(Write, Wide),
        Command::ScsiCmd => Route::Scsi,
        Command::GetGeometry => Route::Geometry,
        Command::GetDriveType => Route::DriveType,
        Command::ChangeNum => Route::ChangeNum,
        Command::Motor => Route::Motor,
        Command::ProtStatus => Route::ProtStatus,
        Command::DeviceQuery => Route::DeviceQuery,
        Command::Update | Command::Clear | Command::Remove | Command::ChangeState => Route::NoOp,
        // Advertised but never implemented by the controller.
        Command::Reset | Command::Stop | Command::Start | Command::Flush | Command::Seek
        | Command::AddChangeInt | Command::RemChangeInt | Command::Seek64
        | Command::NsSeek64 => Route::Unhandled,
    }
}

/// A probed controller and its units.
pub struct Z3660Device<B> {
    regs: RegisterWindow<B>,
    units: UnitRegistry,
}

impl<B: RegisterBus> Z3660Device<B> {
    /// Take ownership of the bus and probe every unit.
    pub fn attach(bus: B, config: &DriverConfig) -> Self {
        let mut regs = RegisterWindow::new(bus, config);
        let units = UnitRegistry::probe_all_units(&mut regs);
        info!("Z3660 attached.");
        Z3660Device { regs, units }
    }

    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    pub fn regs(&self) -> &RegisterWindow<B> {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterWindow<B> {
        &mut self.regs
    }

    /// Carry out a request. The outcome is stored in `req.error` as well as
    /// returned; on failure `req.actual` is zero.
    pub fn perform_io(&mut self, req: &mut IoRequest) -> IoResult<()> {
        let result = self.dispatch(req);
        match result {
            Ok(()) => req.error = None,
            Err(e) => {
                debug!("Unit {}: command {} failed: {}", req.unit, req.command, e);
                req.actual = 0;
                req.error = Some(e);
            }
        }
        result
    }

    /// Cancel a request that has not been performed yet.
    pub fn abort_io(&self, req: &mut IoRequest) {
        req.abort();
    }

    /// Release the bus.
    pub fn detach(self) -> B {
        info!("Z3660 detached.");
        self.regs.into_bus()
    }

    fn dispatch(&mut self, req: &mut IoRequest) -> IoResult<()> {
        let index = req.unit as usize;
        if self.units.usable(index).is_none() {
            return Err(IoError::OpenFailed);
        }
        if req.error == Some(IoError::Aborted) {
            return Err(IoError::Aborted);
        }
        let command = Command::try_from(req.command)?;
        debug!("Unit {}: {:?}", index, command);

        let unit = self.units.get_mut(index).ok_or(IoError::OpenFailed)?;
        handle(&mut self.regs, unit, route(command), req)
    }
}

fn handle<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &mut Unit, route: Route,
                          req: &mut IoRequest) -> IoResult<()> {
    match route {
        Route::NoOp => req.actual = 0,
        Route::Unhandled => return Err(IoError::NoCommand),
        Route::Motor => {
            req.actual = unit.motor_state as u32;
            unit.motor_state = req.length != 0;
        }
        Route::ChangeNum => req.actual = unit.change_count,
        Route::DriveType => req.actual = DEVICE_DIRECT_ACCESS as u32,
        Route::ProtStatus => req.actual = unit.read_only as u32,
        Route::DeviceQuery => {
            match &mut req.data {
                IoData::DeviceQuery(result) => **result = query::device_query(),
                _ => return Err(IoError::BadAddress),
            }
            req.actual = query::QUERY_RESULT_SIZE;
        }
        Route::Geometry => match &mut req.data {
            IoData::Geometry(geometry) => **geometry = drive_geometry(regs, unit),
            _ => return Err(IoError::BadAddress),
        },
        Route::BlockIo(direction, width) => {
            let buffer = match &mut req.data {
                IoData::Buffer(buffer) => Some(&mut **buffer),
                _ => None,
            };
            req.actual = blockio::transfer_bytes(regs, unit, direction, width, req.offset,
                                                 buffer, req.length)?;
        }
        Route::Scsi => match &mut req.data {
            IoData::Scsi(cmd) => scsi::execute(regs, unit, cmd)?,
            _ => return Err(IoError::BadAddress),
        },
    }
    Ok(())
}

fn drive_geometry<B: RegisterBus>(regs: &mut RegisterWindow<B>, unit: &Unit) -> DriveGeometry {
    let sector_size = regs.query_block_size(unit.unit_num);
    let total_sectors = regs.query_block_count(unit.scsi_num);
    DriveGeometry {
        sector_size,
        total_sectors,
        cylinders: unit.cylinders,
        cyl_sectors: unit.heads * unit.sectors_per_track,
        heads: unit.heads,
        track_sectors: unit.sectors_per_track,
        buf_mem_type: MEMF_PUBLIC,
        device_type: DEVICE_DIRECT_ACCESS,
        flags: 0,
    }
}

/// A device that can be driven from several threads. Requests are
/// serialized, so at most one is ever in flight on the controller.
pub struct SharedDevice<B> {
    inner: Arc<Mutex<Z3660Device<B>>>,
}

impl<B> Clone for SharedDevice<B> {
    fn clone(&self) -> Self {
        SharedDevice { inner: Arc::clone(&self.inner) }
    }
}

impl<B: RegisterBus> SharedDevice<B> {
    pub fn new(device: Z3660Device<B>) -> Self {
        SharedDevice { inner: Arc::new(Mutex::new(device)) }
    }

    pub fn perform_io(&self, req: &mut IoRequest) -> IoResult<()> {
        self.with_device(|device| device.perform_io(req))
    }

    /// Run `f` with the device locked.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut Z3660Device<B>) -> R) -> R {
        let mut device = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ntest::timeout;
    use std::thread;
    use std::time::Duration;

    use crate::bus::{MockBus, SimulatedController};
    use crate::query::{DeviceQueryResult, SUPPORTED_COMMANDS};
    use crate::regs::Register;
    use crate::scsi::{opcode, ScsiCmd};
    use crate::store::MemoryStore;

    const BLOCK: u32 = 512;

    /// Mock controller with units 0 and 2 present.
    struct DeviceFixture {
        device: Z3660Device<MockBus>,
    }

    impl DeviceFixture {
        fn new() -> Self {
            crate::init_test_logging();
            let mut bus = MockBus::new();
            for unit in [0, 2] {
                bus.set_for_unit(unit, Register::DriveType, 1);
                bus.set_for_unit(unit, Register::Cylinders, 1000);
                bus.set_for_unit(unit, Register::Heads, 16);
                bus.set_for_unit(unit, Register::Sectors, 63);
                bus.set_for_unit(unit, Register::Blocks, 1_008_000);
                bus.set_for_unit(unit, Register::BlockSize, BLOCK);
            }
            bus.set(Register::UsedDma, 1);
            let mut device = Z3660Device::attach(bus, &DriverConfig::default());
            device.regs_mut().bus_mut().clear_events();
            DeviceFixture { device }
        }

        fn accesses(&self) -> usize {
            self.device.regs().bus().register_accesses()
        }
    }

    fn sim_device(buffer_address: u32) -> Z3660Device<SimulatedController> {
        crate::init_test_logging();
        let sim = SimulatedController::builder()
            .unit(0, MemoryStore::new(2048 * BLOCK as u64), BLOCK)
            .buffer_address(buffer_address)
            .build();
        Z3660Device::attach(sim, &DriverConfig::default())
    }

    #[test]
    fn test_route_table() {
        for command in Command::ALL.iter().copied() {
            // Only plain reads and writes use 32-bit offsets.
            if let Route::BlockIo(_, OffsetWidth::Narrow) = route(command) {
                assert!(matches!(command, Command::Read | Command::Write | Command::Format));
            }
        }
        assert_eq!(route(Command::Format64), Route::BlockIo(Direction::Write, OffsetWidth::Wide));
        assert_eq!(route(Command::NsRead64), Route::BlockIo(Direction::Read, OffsetWidth::Wide));
        assert_eq!(route(Command::Read64), Route::BlockIo(Direction::Read, OffsetWidth::Wide));
        for command in [Command::Update, Command::Clear, Command::Remove, Command::ChangeState] {
            assert_eq!(route(command), Route::NoOp);
        }
        for command in [Command::Reset, Command::Stop, Command::Start, Command::Flush,
                        Command::Seek, Command::AddChangeInt, Command::RemChangeInt,
                        Command::Seek64, Command::NsSeek64] {
            assert_eq!(route(command), Route::Unhandled);
        }
    }

    #[test]
    fn test_unimplemented_commands_report_no_command() {
        let mut fixture = DeviceFixture::new();
        for code in [1u16, 10, 0xC002, 0x1234] {
            let mut req = IoRequest::new(code, 0);
            req.actual = 7;
            assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::NoCommand));
            assert_eq!(req.error.map(IoError::code), Some(-3));
            assert_eq!(req.actual, 0);
        }
        assert_eq!(fixture.accesses(), 0);

        let mut req = IoRequest::with_command(Command::Clear, 0);
        assert_eq!(fixture.device.perform_io(&mut req), Ok(()));
    }

    #[test]
    fn test_absent_unit_touches_nothing() {
        let mut fixture = DeviceFixture::new();
        let mut buf = [0u8; 512];
        for unit in [1, 6, 7, 200] {
            let mut req = IoRequest::with_command(Command::Read, unit).buffer(&mut buf);
            assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::OpenFailed));
            assert_eq!(req.error, Some(IoError::OpenFailed));
            assert_eq!(req.actual, 0);
        }
        assert_eq!(fixture.accesses(), 0);
    }

    #[test]
    fn test_aborted_request() {
        let mut fixture = DeviceFixture::new();
        let mut buf = [0u8; 512];
        let mut req = IoRequest::with_command(Command::Write, 2).buffer(&mut buf);
        fixture.device.abort_io(&mut req);
        assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::Aborted));
        assert_eq!(fixture.accesses(), 0);
    }

    #[test]
    fn test_unknown_command() {
        let mut fixture = DeviceFixture::new();
        let mut req = IoRequest::new(16, 0);
        assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::NoCommand));
        assert_eq!(req.error.map(IoError::code), Some(-3));
    }

    #[test]
    fn test_simple_queries() {
        let mut fixture = DeviceFixture::new();
        let mut req = IoRequest::with_command(Command::ChangeNum, 0);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 1);

        let mut req = IoRequest::with_command(Command::GetDriveType, 0);
        req.actual = 99;
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 0);

        let mut req = IoRequest::with_command(Command::ProtStatus, 2);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 0);

        for command in [Command::Reset, Command::Update, Command::Seek, Command::RemChangeInt] {
            let mut req = IoRequest::with_command(command, 2);
            assert_eq!(fixture.device.perform_io(&mut req), Ok(()));
            assert_eq!(req.actual, 0);
        }
        assert_eq!(fixture.accesses(), 0);
    }

    #[test]
    fn test_motor() {
        let mut fixture = DeviceFixture::new();
        let mut req = IoRequest::with_command(Command::Motor, 0).length(1);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 0);
        let mut req = IoRequest::with_command(Command::Motor, 0).length(0);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 1);
        let mut req = IoRequest::with_command(Command::Motor, 0).length(0);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 0);
        assert!(!fixture.device.units().get(2).unwrap().motor_state);
    }

    #[test]
    fn test_geometry() {
        let mut fixture = DeviceFixture::new();
        let mut geometry = DriveGeometry::default();
        let mut req = IoRequest::with_command(Command::GetGeometry, 2).geometry(&mut geometry);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 0);
        assert_eq!(geometry, DriveGeometry {
            sector_size: 512,
            total_sectors: 1_008_000,
            cylinders: 1000,
            cyl_sectors: 16 * 63,
            heads: 16,
            track_sectors: 63,
            buf_mem_type: MEMF_PUBLIC,
            device_type: 0,
            flags: 0,
        });

        let mut req = IoRequest::with_command(Command::GetGeometry, 2);
        assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::BadAddress));
    }

    #[test]
    fn test_device_query() {
        let mut fixture = DeviceFixture::new();
        let mut result = DeviceQueryResult::default();
        let mut req = IoRequest::with_command(Command::DeviceQuery, 0).device_query(&mut result);
        fixture.device.perform_io(&mut req).unwrap();
        assert_eq!(req.actual, 16);
        assert_eq!(result.device_type, 5);
        assert_eq!(result.supported_commands, &SUPPORTED_COMMANDS[..]);
    }

    #[test]
    fn test_short_read_programs_no_transfer() {
        let mut fixture = DeviceFixture::new();
        let mut buf = [0u8; 511];
        let mut req = IoRequest::with_command(Command::Read, 0).buffer(&mut buf);
        assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::BadLength));
        assert_eq!(req.actual, 0);
        let bus = fixture.device.regs().bus();
        for reg in [Register::Address, Register::Length, Register::BufferPointer, Register::ReadBytes] {
            assert!(bus.writes_to(reg).is_empty());
        }
    }

    #[test]
    fn test_scsi_error_clears_actual() {
        let mut fixture = DeviceFixture::new();
        let cdb = [opcode::TEST_UNIT_READY, 0, 0, 0];
        let mut req = IoRequest::with_command(Command::ScsiCmd, 0).scsi(ScsiCmd::new(&cdb, None));
        req.actual = 5;
        assert_eq!(fixture.device.perform_io(&mut req), Err(IoError::BadLength));
        assert_eq!(req.actual, 0);
        assert_eq!(req.scsi_cmd().map(|cmd| cmd.actual), Some(0));
    }

    #[test]
    #[timeout(3000)]
    fn test_round_trip_both_paths() {
        for buffer_address in [0x4000_0000, 0x0001_0000] {
            let mut device = sim_device(buffer_address);
            let mut out: Vec<u8> = (0..4 * BLOCK).map(|i| (i ^ (i >> 8)) as u8).collect();
            let expected = out.clone();
            let mut req = IoRequest::with_command(Command::NsWrite64, 0)
                .buffer(&mut out)
                .offset(100 * BLOCK as u64);
            device.perform_io(&mut req).unwrap();
            assert_eq!(req.actual, 4 * BLOCK);

            let mut back = vec![0u8; (4 * BLOCK) as usize];
            let mut req = IoRequest::with_command(Command::Read, 0)
                .buffer(&mut back)
                .offset(100 * BLOCK as u64);
            device.perform_io(&mut req).unwrap();
            assert_eq!(req.actual, 4 * BLOCK);
            assert_eq!(back, expected);

            // The same data through SCSI READ(10).
            let mut scsi_back = vec![0u8; (4 * BLOCK) as usize];
            let cdb = [opcode::READ_10, 0, 0, 0, 0, 100, 0, 0, 4, 0];
            let mut req = IoRequest::with_command(Command::ScsiCmd, 0)
                .scsi(ScsiCmd::new(&cdb, Some(&mut scsi_back)));
            device.perform_io(&mut req).unwrap();
            assert_eq!(req.scsi_cmd().map(|cmd| cmd.actual), Some(4 * BLOCK));
            assert_eq!(scsi_back, expected);
        }
    }

    #[test]
    #[timeout(3000)]
    fn test_hung_controller_times_out() {
        crate::init_test_logging();
        let sim = SimulatedController::builder()
            .unit(0, MemoryStore::new(16 * BLOCK as u64), BLOCK)
            .completion_delay(Duration::from_millis(500))
            .build();
        let config = DriverConfig::default().with_timeout(Duration::from_millis(20));
        let mut device = Z3660Device::attach(sim, &config);
        let mut buf = [0u8; 512];
        let mut req = IoRequest::with_command(Command::Read, 0).buffer(&mut buf);
        assert_eq!(device.perform_io(&mut req), Err(IoError::Timeout));
        assert_eq!(req.error.map(IoError::code), Some(42));
        assert_eq!(req.actual, 0);
    }

    #[test]
    #[timeout(3000)]
    fn test_write_after_timeout_keeps_buffer() {
        crate::init_test_logging();
        let sim = SimulatedController::builder()
            .unit(0, MemoryStore::new(16 * BLOCK as u64), BLOCK)
            .completion_delay(Duration::from_millis(100))
            .build();
        let config = DriverConfig::default().with_timeout(Duration::from_millis(10));
        let mut device = Z3660Device::attach(sim, &config);
        let mut buf = [0u8; 512];
        let mut req = IoRequest::with_command(Command::Read, 0).buffer(&mut buf);
        assert_eq!(device.perform_io(&mut req), Err(IoError::Timeout));
        thread::sleep(Duration::from_millis(300));

        let mut device = Z3660Device::attach(device.detach(), &DriverConfig::default());
        let mut out = [0xAB; 512];
        let mut req = IoRequest::with_command(Command::Write, 0)
            .buffer(&mut out)
            .offset(BLOCK as u64);
        assert_eq!(device.perform_io(&mut req), Ok(()));
        assert_eq!(req.actual, BLOCK);
        assert_eq!(out, [0xAB; 512]);
    }

    #[test]
    #[timeout(5000)]
    fn test_shared_device_serializes_requests() {
        let shared = SharedDevice::new(sim_device(0x4000_0000));
        let workers: Vec<_> = (0..4u8)
            .map(|n| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let block = n as u64 * 8;
                    for round in 0..10u8 {
                        let mut out = vec![n.wrapping_mul(31).wrapping_add(round); BLOCK as usize];
                        let mut req = IoRequest::with_command(Command::Write, 0)
                            .buffer(&mut out)
                            .offset(block * BLOCK as u64);
                        shared.perform_io(&mut req).unwrap();

                        let mut back = vec![0u8; BLOCK as usize];
                        let mut req = IoRequest::with_command(Command::Read, 0)
                            .buffer(&mut back)
                            .offset(block * BLOCK as u64);
                        shared.perform_io(&mut req).unwrap();
                        assert_eq!(back, out);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let present = shared.with_device(|device| device.units().present().count());
        assert_eq!(present, 1);
    }
}
