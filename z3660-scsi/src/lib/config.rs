use std::time::Duration;

/// Offset of the register window from the start of the board.
pub const DEFAULT_REGISTER_OFFSET: u32 = 0x2000;

/// Lowest bus address the controller can reach by DMA. Caller buffers
/// below this are staged through the scratch window.
pub const DEFAULT_DMA_LIMIT: u32 = 0x0800_0000;

/// How long to wait for the controller to finish a single transfer.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-controller driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub register_offset: u32,
    pub completion_timeout: Duration,
    pub dma_limit: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            register_offset: DEFAULT_REGISTER_OFFSET,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            dma_limit: DEFAULT_DMA_LIMIT,
        }
    }
}

impl DriverConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }
}
