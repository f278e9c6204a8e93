//! CRC32C (Castagnoli) checksums over block and journal entry bytes.

/// Compute the CRC32C checksum of `data`.
#[inline]
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_for_nonempty_input() {
        assert_ne!(crc32c(b"hello world"), 0);
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let mut data = [0u8; 64];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let before = crc32c(&data);
        data[10] ^= 0x01;
        let after = crc32c(&data);
        assert_ne!(before, after);
    }
}
