//! CRC32 for MPEG-2 TS PSI tables
//! Based on ITU-T H.222.0 / ISO/IEC 13818-1
//! Polynomial: x32 + x26 + x23 + x22 + x16 + x12 + x11 + x10 + x8 + x7 + x5 + x4 + x2 + x + 1
//! Initial value: 0xFFFFFFFF, no reflection, no final XOR

use crc::{Crc, CRC_32_MPEG_2};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// MPEG-2 CRC32 calculator used for PSI section trailers
///
/// Uses the IEEE 802.3 polynomial (`0x04C11DB7`) in the non-reflected form
/// that transport-stream demuxers verify.
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    /// Calculates the CRC32 checksum of `data`
    ///
    /// # Examples
    ///
    /// ```
    /// use hlsmux::utils::Crc32Mpeg2;
    ///
    /// assert_eq!(Crc32Mpeg2::calculate(b"123456789"), 0x0376E6E7);
    /// ```
    pub fn calculate(data: &[u8]) -> u32 {
        CRC.checksum(data)
    }

    /// Checks a section whose last four bytes are its big-endian CRC trailer
    pub fn verify(section: &[u8]) -> bool {
        if section.len() < 4 {
            return false;
        }
        let (body, trailer) = section.split_at(section.len() - 4);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        Self::calculate(body) == expected
    }
}
