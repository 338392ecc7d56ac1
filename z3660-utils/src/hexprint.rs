use std::fmt::Write;

/// Width of the hex column for a full row: 16 bytes of two digits, single
/// spaces inside each group of four and double spaces between groups.
const HEX_COLUMN_WIDTH: usize = 16 * 2 + 12 + 6;

/// Format `buf` as rows of 16 bytes: an address header counting from
/// `start`, the bytes in hex, and their printable ASCII.
pub fn hex_block(buf: &[u8], start: usize) -> String {
    let mut out = String::with_capacity((buf.len() / 16 + 1) * 80);
    for (row, chunk) in buf.chunks(16).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        let mut hex = String::with_capacity(HEX_COLUMN_WIDTH);
        for (i, byte) in chunk.iter().enumerate() {
            if i > 0 {
                hex.push_str(if i % 4 == 0 { "  " } else { " " });
            }
            write!(hex, "{:02X}", byte).unwrap();
        }
        let ascii: String = chunk.iter().map(|&b| printable(b)).collect();
        write!(out, "{:#010X}    {:<width$}  |{}|",
               start + row * 16, hex, ascii, width = HEX_COLUMN_WIDTH).unwrap();
    }
    out
}

/// Shortcut for starting the addresses at zero.
#[inline]
pub fn hex_block_zero(buf: &[u8]) -> String {
    hex_block(buf, 0)
}

fn printable(chr: u8) -> char {
    match chr {
        32..=126 => chr.into(),
        _ => '.',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_row() {
        let buf: Vec<u8> = (0x41..0x51).collect();
        assert_eq!(hex_block_zero(&buf),
                   "0x00000000    41 42 43 44  45 46 47 48  49 4A 4B 4C  4D 4E 4F 50  \
                    |ABCDEFGHIJKLMNOP|");
    }

    #[test]
    fn test_partial_row_is_padded() {
        let out = hex_block(&[0x00, 0x5A], 0x200);
        assert_eq!(out, format!("0x00000200    00 5A{}  |.Z|", " ".repeat(45)));
    }

    #[test]
    fn test_rows_split() {
        let out = hex_block_zero(&[0xFF; 17]);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("0x00000010    FF"));
    }
}
