use std::time::Duration;

/// Everything the driver needs from the board: 32-bit register access at
/// byte offsets within the register window, the scratch window, and the
/// cache maintenance that brackets a DMA transfer.
pub trait RegisterBus {
    fn write_long(&mut self, offset: u32, value: u32);
    fn read_long(&mut self, offset: u32) -> u32;

    /// The address the controller sees for a caller buffer.
    fn bus_address(&self, buffer: &[u8]) -> u32;

    fn scratch_len(&self) -> usize;
    /// Copy into the start of the scratch window. `data` never exceeds
    /// `scratch_len()`.
    fn copy_to_scratch(&mut self, data: &[u8]);
    /// Copy out of the start of the scratch window. `data` never exceeds
    /// `scratch_len()`.
    fn copy_from_scratch(&mut self, data: &mut [u8]);

    /// Called before a command register store that may DMA into or out of `buffer`.
    fn pre_dma(&mut self, buffer: &[u8]);
    /// Called once the transfer has finished or been given up on.
    fn post_dma(&mut self, buffer: &mut [u8]);

    /// Block until every issued command has completed. Returns false if
    /// that takes longer than `timeout`. Buses whose command stores only
    /// return once the transfer is done need not override this.
    fn wait_complete(&mut self, _timeout: Duration) -> bool {
        true
    }
}
