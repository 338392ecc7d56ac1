/// Read big-endian fields out of a byte buffer at fixed offsets.
///
/// All methods panic if the field does not fit inside the buffer, exactly
/// like slice indexing; callers check lengths first.
pub trait ReadBE {
    fn be_u16_at(&self, offset: usize) -> u16;
    fn be_u24_at(&self, offset: usize) -> u32;
    fn be_u32_at(&self, offset: usize) -> u32;
}

impl ReadBE for [u8] {
    fn be_u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self[offset], self[offset + 1]])
    }

    fn be_u24_at(&self, offset: usize) -> u32 {
        u32::from_be_bytes([0, self[offset], self[offset + 1], self[offset + 2]])
    }

    fn be_u32_at(&self, offset: usize) -> u32 {
        u32::from_be_bytes([self[offset], self[offset + 1],
                            self[offset + 2], self[offset + 3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields() {
        let buf = [0x12, 0x34, 0x56, 0x78, 0x9A];
        assert_eq!(buf.be_u16_at(0), 0x1234);
        assert_eq!(buf.be_u24_at(1), 0x34_5678);
        assert_eq!(buf.be_u32_at(1), 0x3456_789A);
    }
}
