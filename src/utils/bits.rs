use crate::error::{MuxError, Result};
use crate::utils::crc::Crc32Mpeg2;
use bitvec::prelude::*;
use bytes::Bytes;

/// Returns bits `[start, end)` of `src` right-aligned in a byte.
///
/// Bit 0 is the most significant bit of `src[0]`. The range is at most 8 bits
/// wide; when it straddles a byte boundary the tail of the first byte and the
/// head of the second are joined with shift-and-OR.
///
/// ```
/// use hlsmux::utils::extract_bits;
///
/// let data = [0b1011_0011, 0b0101_1010];
/// assert_eq!(extract_bits(&data, 0, 3), 0b101);
/// assert_eq!(extract_bits(&data, 6, 11), 0b11010);
/// ```
pub fn extract_bits(src: &[u8], start: usize, end: usize) -> u8 {
    debug_assert!(start <= end && end - start <= 8);
    let width = end - start;
    if width == 0 {
        return 0;
    }

    let first = start / 8;
    let last = (end - 1) / 8;
    let start_in_byte = start % 8;

    if first == last {
        (src[first] << start_in_byte) >> (8 - width)
    } else {
        let head_bits = 8 - start_in_byte;
        let tail_bits = width - head_bits;
        let head = src[first] & (0xFF >> start_in_byte);
        (head << tail_bits) | (src[last] >> (8 - tail_bits))
    }
}

/// A fixed-capacity, bit-granular output buffer.
///
/// Every encoder in the crate serializes through a `BitBuffer`: fields of 1 to
/// 64 bits are pushed in order, most significant bit first, and bytes that a
/// field only partially covers are completed by the next push with a bitwise
/// OR. The cursor never moves backwards.
///
/// Example:
/// ```
/// use hlsmux::utils::BitBuffer;
///
/// let mut buf = BitBuffer::new(2);
/// buf.push_flag(true).unwrap();
/// buf.push_flag(false).unwrap();
/// buf.push_flag(true).unwrap();
/// buf.push_uint(0b00011, 5).unwrap();
/// buf.push_aligned_byte(0x47).unwrap();
/// assert_eq!(&buf.finish()[..], &[0b1010_0011, 0x47]);
/// ```
#[derive(Debug, Clone)]
pub struct BitBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl BitBuffer {
    /// Allocates a zero-filled buffer of `len` bytes with the cursor at 0
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; len],
            offset: 0,
        }
    }

    /// Cursor position in bits
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Capacity in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-capacity buffer
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bits left before the buffer is full
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.offset
    }

    /// True when the cursor sits on a byte boundary
    pub fn is_aligned(&self) -> bool {
        self.offset % 8 == 0
    }

    /// True when every bit has been written
    pub fn is_full(&self) -> bool {
        self.remaining_bits() == 0
    }

    fn ensure_room(&self, bits: usize) -> Result<()> {
        if bits > self.remaining_bits() {
            return Err(MuxError::CapacityExceeded {
                what: "bit buffer",
                needed: (self.offset + bits).div_ceil(8),
                capacity: self.data.len(),
            });
        }
        Ok(())
    }

    fn ensure_aligned(&self) -> Result<()> {
        if !self.is_aligned() {
            return Err(MuxError::Misaligned {
                offset: self.offset,
            });
        }
        Ok(())
    }

    /// Writes the top `width` bits of `bytes`, read MSB-first.
    ///
    /// The write is split at byte boundaries; each piece is shifted into the
    /// free positions of the current byte and OR-ed in.
    pub fn push_bits(&mut self, bytes: &[u8], width: usize) -> Result<()> {
        if width > bytes.len() * 8 {
            return Err(MuxError::InvalidField(format!(
                "{} bits requested from a {}-byte value",
                width,
                bytes.len()
            )));
        }
        self.ensure_room(width)?;

        let mut bit_index = 0;
        while bit_index < width {
            let residual = 8 - self.offset % 8;
            let pushed = residual.min(width - bit_index);
            let chunk = extract_bits(bytes, bit_index, bit_index + pushed) << (residual - pushed);
            self.data[self.offset / 8] |= chunk;
            self.offset += pushed;
            bit_index += pushed;
        }
        Ok(())
    }

    /// Writes the low-order `width` bits of `value` (1..=64).
    ///
    /// A value with bits set above `width` is rejected instead of being
    /// silently truncated.
    pub fn push_uint(&mut self, value: u64, width: u32) -> Result<()> {
        if width == 0 || width > 64 {
            return Err(MuxError::InvalidField(format!(
                "field width {} out of range",
                width
            )));
        }
        if width < 64 && value >> width != 0 {
            return Err(MuxError::InvalidField(format!(
                "value {:#x} does not fit in {} bits",
                value, width
            )));
        }
        let aligned = if width == 64 {
            value
        } else {
            value << (64 - width)
        };
        self.push_bits(&aligned.to_be_bytes(), width as usize)
    }

    /// Writes a single bit
    pub fn push_flag(&mut self, flag: bool) -> Result<()> {
        self.push_uint(flag as u64, 1)
    }

    /// Writes a whole byte at a byte-aligned cursor
    pub fn push_aligned_byte(&mut self, value: u8) -> Result<()> {
        self.ensure_aligned()?;
        self.ensure_room(8)?;
        self.data[self.offset / 8] = value;
        self.offset += 8;
        Ok(())
    }

    /// Writes a run of whole bytes, bit-packed when the cursor is unaligned
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_aligned() {
            return self.push_bits(bytes, bytes.len() * 8);
        }
        self.ensure_room(bytes.len() * 8)?;
        let start = self.offset / 8;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len() * 8;
        Ok(())
    }

    /// Repeats `value` from the cursor to the end of the buffer
    pub fn fill_remaining(&mut self, value: u8) -> Result<()> {
        self.ensure_aligned()?;
        let start = self.offset / 8;
        self.data[start..].fill(value);
        self.offset = self.data.len() * 8;
        Ok(())
    }

    /// CRC32 (MPEG-2) over every complete byte written so far
    pub fn checksum(&self) -> u32 {
        Crc32Mpeg2::calculate(&self.data[..self.offset / 8])
    }

    /// CRC32 (MPEG-2) over the first `len` bytes of the buffer
    pub fn checksum_prefix(&self, len: usize) -> Result<u32> {
        if len > self.data.len() {
            return Err(MuxError::CapacityExceeded {
                what: "checksum prefix",
                needed: len,
                capacity: self.data.len(),
            });
        }
        Ok(Crc32Mpeg2::calculate(&self.data[..len]))
    }

    /// Bytes of the buffer, including any not yet written
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bit view of the buffer, MSB-first within each byte
    pub fn as_bits(&self) -> &BitSlice<u8, Msb0> {
        self.data.view_bits::<Msb0>()
    }

    /// Consumes the buffer and returns its bytes
    pub fn finish(self) -> Bytes {
        Bytes::from(self.data)
    }
}

/// A bit-level reader used to read encoded fields back.
///
/// Example:
/// ```
/// use hlsmux::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);   // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    /// Returns true for 1, false for 0.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(MuxError::Parser("reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits (at most 64) as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(MuxError::Parser("too many bits requested".into()));
        }
        if n as usize > self.available_bits() {
            return Err(MuxError::Parser("reached end of data".into()));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    /// Aligns reader to next byte boundary by skipping remaining bits in current byte.
    pub fn align_byte(&mut self) {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }
}
