//! LSB-first bit reader.
//!
//! Patch command streams pack their codes least-significant-bit first: the
//! first bit of the stream is bit 0 of byte 0.

use crate::{Error, Result};

/// A cursor over a byte slice that reads up to 32 bits at a time.
///
/// # Example
///
/// ```
/// use rpak_common::BitReader;
///
/// let data = [0b1010_0110];
/// let mut bits = BitReader::new(&data);
///
/// assert_eq!(bits.peek(3), 0b110);
/// assert_eq!(bits.read(3).unwrap(), 0b110);
/// assert_eq!(bits.read(5).unwrap(), 0b10100);
/// assert_eq!(bits.remaining_bits(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: u64,
}

impl<'a> BitReader<'a> {
    /// Create a new bit reader positioned at the first bit.
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Resume reading at an absolute bit position.
    #[inline]
    pub const fn new_at(data: &'a [u8], bit_pos: u64) -> Self {
        Self { data, bit_pos }
    }

    /// Bits consumed so far.
    #[inline]
    pub const fn position(&self) -> u64 {
        self.bit_pos
    }

    /// Bits left before the end of the stream.
    #[inline]
    pub fn remaining_bits(&self) -> u64 {
        (self.data.len() as u64 * 8).saturating_sub(self.bit_pos)
    }

    /// Look at the next `count` bits without consuming them.
    ///
    /// Bits past the end of the stream read as zero.
    pub fn peek(&self, count: u32) -> u32 {
        debug_assert!(count <= 32);
        if count == 0 {
            return 0;
        }

        let byte = (self.bit_pos / 8) as usize;
        let shift = (self.bit_pos % 8) as u32;

        let mut window = [0u8; 8];
        if byte < self.data.len() {
            let available = (self.data.len() - byte).min(8);
            window[..available].copy_from_slice(&self.data[byte..byte + available]);
        }

        let value = u64::from_le_bytes(window) >> shift;
        (value & ((1u64 << count) - 1)) as u32
    }

    /// Consume `count` bits.
    pub fn consume(&mut self, count: u32) -> Result<()> {
        let available = self.remaining_bits();
        if u64::from(count) > available {
            return Err(Error::UnexpectedEndOfBits {
                needed: count,
                available,
            });
        }
        self.bit_pos += u64::from(count);
        Ok(())
    }

    /// Read and consume `count` bits.
    pub fn read(&mut self, count: u32) -> Result<u32> {
        let value = self.peek(count);
        self.consume(count)?;
        Ok(value)
    }
}
