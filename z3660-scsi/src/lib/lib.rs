//! Driver core for the Z3660 accelerator's SCSI register protocol: unit
//! probing, block reads and writes through DMA or the scratch window, and a
//! small SCSI disk emulation on top.

pub mod blockio;
pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod query;
pub mod regs;
pub mod request;
pub mod scsi;
pub mod store;
pub mod unit;

pub use bus::{RegisterBus, SimulatedController};
pub use config::DriverConfig;
pub use device::{SharedDevice, Z3660Device};
pub use error::{IoError, IoResult};
pub use request::{Command, IoData, IoRequest};
pub use scsi::ScsiCmd;
pub use unit::{Unit, UnitRegistry, NUM_UNITS};

/// Initialise logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    use simplelog::{Config, LevelFilter, TestLogger};

    // The logger can only be initialised once, but we don't know the order of
    // tests. Therefore we ignore the result.
    let _ = TestLogger::init(LevelFilter::Trace, Config::default());
}
