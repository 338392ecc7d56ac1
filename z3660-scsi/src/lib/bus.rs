mod bus_interface;
mod bus_mmio;
mod bus_sim;

pub use bus_interface::RegisterBus;
pub use bus_mmio::{CacheControl, FenceCache, MmioBus};
pub use bus_sim::{SimulatedController, SimulatedControllerBuilder, DEFAULT_BUFFER_ADDRESS};

// Register-level fake for testing the driver layers.
#[cfg(test)]
mod bus_mock;
#[cfg(test)]
pub use bus_mock::{BusEvent, MockBus};
