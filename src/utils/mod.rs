//! # Utility Functions and Types
//!
//! Bit-level and checksum helpers shared by every encoder in the crate:
//!
//! - [`BitBuffer`]: fixed-capacity output buffer with a bit cursor
//! - [`BitReader`]: reads encoded fields back
//! - [`Crc32Mpeg2`]: CRC32 trailers for PSI sections
//!
//! ## Bit Operations
//!
//! ```rust
//! use hlsmux::utils::{BitBuffer, BitReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut buf = BitBuffer::new(2);
//! buf.push_uint(0b111, 3)?;      // reserved
//! buf.push_uint(0x0100, 13)?;    // PID
//! let bytes = buf.finish();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bits(3)?, 0b111);
//! assert_eq!(reader.read_bits(13)?, 0x0100);
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use hlsmux::utils::Crc32Mpeg2;
//!
//! let crc = Crc32Mpeg2::calculate(b"Hello, world!");
//! println!("CRC32: {:08x}", crc);
//! ```

/// Bit buffer and bitstream reading utilities
pub mod bits;

/// CRC calculation for PSI sections
pub mod crc;

// Re-export commonly used types
pub use bits::{extract_bits, BitBuffer, BitReader};
pub use crc::Crc32Mpeg2;
