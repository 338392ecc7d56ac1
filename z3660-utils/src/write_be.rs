/// Store big-endian fields into a byte buffer at fixed offsets.
///
/// Later stores may overlap earlier ones; the last store wins for each
/// byte, which some response layouts rely on.
pub trait WriteBE {
    fn put_be_u16_at(&mut self, offset: usize, val: u16);
    fn put_be_u32_at(&mut self, offset: usize, val: u32);
}

impl WriteBE for [u8] {
    fn put_be_u16_at(&mut self, offset: usize, val: u16) {
        self[offset..offset + 2].copy_from_slice(&val.to_be_bytes());
    }

    fn put_be_u32_at(&mut self, offset: usize, val: u32) {
        self[offset..offset + 4].copy_from_slice(&val.to_be_bytes());
    }
}
