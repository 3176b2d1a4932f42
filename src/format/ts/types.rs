use crate::error::{MuxError, Result};
use crate::utils::BitBuffer;
use bytes::Bytes;
use std::time::Duration;

// Stream IDs
pub const STREAM_ID_H264: u8 = 0xe0;
pub const STREAM_ID_AAC: u8 = 0xc0;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_PMT: u16 = 0x1000;
pub const PID_VIDEO: u16 = 0x0100;
pub const PID_AUDIO: u16 = 0x0101;
pub const PID_MAX: u16 = 0x1fff;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Elementary Stream Types
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_AAC: u8 = 0x0f;

// Descriptor tags
pub const DESCRIPTOR_TAG_LANGUAGE: u8 = 0x0a;

// Constants
pub const SYNC_BYTE: u8 = 0x47;
pub const STUFFING_BYTE: u8 = 0xff;
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
pub const PCR_SIZE: usize = 6;
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;
pub const TIMESTAMP_MAX: u64 = (1 << 33) - 1;

/// Adaptation field control values
pub const AFC_PAYLOAD_ONLY: u8 = 0b01;
pub const AFC_ADAPTATION_ONLY: u8 = 0b10;
pub const AFC_ADAPTATION_AND_PAYLOAD: u8 = 0b11;

/// A record that serializes itself field by field.
///
/// `to_bytes` allocates a [`BitBuffer`] of exactly `encoded_len()` bytes,
/// runs `write_to` and hands back the owned bytes. Composite records embed
/// their children by pushing the children's `to_bytes` output.
pub trait Encode {
    /// Serialized size in bytes
    fn encoded_len(&self) -> usize;

    /// Pushes every field, in wire order, into `buf`
    fn write_to(&self, buf: &mut BitBuffer) -> Result<()>;

    /// Serializes into a freshly allocated buffer
    fn to_bytes(&self) -> Result<Bytes> {
        let len = self.encoded_len();
        let mut buf = BitBuffer::new(len);
        self.write_to(&mut buf)?;
        if !buf.is_full() {
            return Err(MuxError::InvalidField(format!(
                "encoder wrote {} of {} bits",
                buf.offset(),
                len * 8
            )));
        }
        Ok(buf.finish())
    }
}

fn check_pid(pid: u16) -> Result<()> {
    if pid > PID_MAX {
        return Err(MuxError::InvalidField(format!("PID {:#x} exceeds 13 bits", pid)));
    }
    Ok(())
}

/// Transport packet header.
#[derive(Debug, Clone, PartialEq)]
pub struct TSHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    /// 13-bit packet identifier
    pub pid: u16,
    /// 2-bit scrambling control
    pub scrambling_control: u8,
    /// 2-bit adaptation field control, see the `AFC_*` constants
    pub adaptation_field_control: u8,
    /// 4-bit continuity counter
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_control: AFC_PAYLOAD_ONLY,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    /// Payload-only header for `pid`
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    /// Marks the packet as the first of a PES packet or PSI section
    pub fn with_payload_unit_start(mut self, start: bool) -> Self {
        self.payload_unit_start = start;
        self
    }

    pub fn with_continuity_counter(mut self, counter: u8) -> Self {
        self.continuity_counter = counter & 0x0f;
        self
    }

    pub fn with_adaptation_field_control(mut self, control: u8) -> Self {
        self.adaptation_field_control = control;
        self
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 2 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 1 != 0
    }
}

impl Encode for TSHeader {
    fn encoded_len(&self) -> usize {
        TS_HEADER_SIZE
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        check_pid(self.pid)?;
        buf.push_aligned_byte(SYNC_BYTE)?;
        buf.push_flag(self.transport_error)?;
        buf.push_flag(self.payload_unit_start)?;
        buf.push_flag(self.transport_priority)?;
        buf.push_uint(self.pid as u64, 13)?;
        buf.push_uint(self.scrambling_control as u64, 2)?;
        buf.push_uint(self.adaptation_field_control as u64, 2)?;
        buf.push_uint(self.continuity_counter as u64, 4)
    }
}

/// Program clock reference: 33-bit base at 90 kHz, 9-bit extension at 27 MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pcr {
    pub base: u64,
    pub extension: u16,
}

impl Pcr {
    /// PCR from a 90 kHz tick count, wrapped to 33 bits
    pub fn from_90khz(ticks: u64) -> Self {
        Self {
            base: ticks & TIMESTAMP_MAX,
            extension: 0,
        }
    }

    /// PCR from a 27 MHz tick count
    pub fn from_27mhz(ticks: u64) -> Self {
        Self {
            base: (ticks / 300) & TIMESTAMP_MAX,
            extension: (ticks % 300) as u16,
        }
    }

    pub fn from_duration(time: Duration) -> Self {
        let ticks = time.as_nanos() * PCR_HZ as u128 / 1_000_000_000;
        Self::from_27mhz(ticks as u64)
    }

    /// Full clock value in 27 MHz ticks
    pub fn as_27mhz(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    pub fn to_duration(&self) -> Duration {
        Duration::from_nanos((self.as_27mhz() as u128 * 1_000_000_000 / PCR_HZ as u128) as u64)
    }
}

impl Encode for Pcr {
    fn encoded_len(&self) -> usize {
        PCR_SIZE
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        buf.push_uint(self.base, 33)?;
        buf.push_uint(0x3f, 6)?; // Reserved
        buf.push_uint(self.extension as u64, 9)
    }
}

/// Adaptation field.
///
/// `length` is the declared size excluding the length byte. Content shorter
/// than the declared size is padded with stuffing bytes; a declared length of
/// zero is the single-byte stuffing form with no flags byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptationField {
    pub length: u8,
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr: Option<Pcr>,
    pub opcr: Option<Pcr>,
    pub splice_countdown: Option<i8>,
    pub private_data: Option<Vec<u8>>,
}

impl AdaptationField {
    /// Field made only of stuffing, `length` bytes after the length byte
    pub fn stuffing(length: u8) -> Self {
        Self {
            length,
            ..Default::default()
        }
    }

    /// Attaches a PCR, growing the declared length if needed
    pub fn with_pcr(mut self, pcr: Pcr) -> Self {
        self.pcr = Some(pcr);
        self.fit();
        self
    }

    pub fn with_random_access(mut self, random_access: bool) -> Self {
        self.random_access = random_access;
        self.fit();
        self
    }

    pub fn with_discontinuity(mut self, discontinuity: bool) -> Self {
        self.discontinuity = discontinuity;
        self.fit();
        self
    }

    fn has_flags(&self) -> bool {
        self.discontinuity
            || self.random_access
            || self.es_priority
            || self.pcr.is_some()
            || self.opcr.is_some()
            || self.splice_countdown.is_some()
            || self.private_data.is_some()
    }

    /// Bytes the flags and optional records need after the length byte
    pub fn content_len(&self) -> usize {
        if !self.has_flags() {
            return 0;
        }
        1 + self.pcr.map_or(0, |_| PCR_SIZE)
            + self.opcr.map_or(0, |_| PCR_SIZE)
            + self.splice_countdown.map_or(0, |_| 1)
            + self.private_data.as_ref().map_or(0, |d| 1 + d.len())
    }

    /// Raises the declared length to at least the content size
    pub fn fit(&mut self) {
        let needed = self.content_len().min(u8::MAX as usize) as u8;
        self.length = self.length.max(needed);
    }
}

impl Encode for AdaptationField {
    fn encoded_len(&self) -> usize {
        self.length as usize + 1
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        let content = self.content_len();
        if content > self.length as usize {
            return Err(MuxError::CapacityExceeded {
                what: "adaptation field",
                needed: content,
                capacity: self.length as usize,
            });
        }

        buf.push_aligned_byte(self.length)?;
        if self.length == 0 {
            return Ok(());
        }

        buf.push_flag(self.discontinuity)?;
        buf.push_flag(self.random_access)?;
        buf.push_flag(self.es_priority)?;
        buf.push_flag(self.pcr.is_some())?;
        buf.push_flag(self.opcr.is_some())?;
        buf.push_flag(self.splice_countdown.is_some())?;
        buf.push_flag(self.private_data.is_some())?;
        buf.push_flag(false)?; // Extension

        if let Some(pcr) = &self.pcr {
            buf.push_bytes(&pcr.to_bytes()?)?;
        }
        if let Some(opcr) = &self.opcr {
            buf.push_bytes(&opcr.to_bytes()?)?;
        }
        if let Some(countdown) = self.splice_countdown {
            buf.push_aligned_byte(countdown as u8)?;
        }
        if let Some(data) = &self.private_data {
            buf.push_aligned_byte(data.len() as u8)?;
            buf.push_bytes(data)?;
        }

        buf.fill_remaining(STUFFING_BYTE)
    }
}

pub fn pts_to_time(pts: u64) -> Duration {
    Duration::from_nanos(pts * 1_000_000_000 / PTS_HZ)
}

pub fn time_to_pts(time: Duration) -> u64 {
    (time.as_nanos() * PTS_HZ as u128 / 1_000_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_layout() {
        let header = TSHeader::new(0x1000)
            .with_payload_unit_start(true)
            .with_continuity_counter(5);
        let bytes = header.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x47, 0x50, 0x00, 0x15]);

        let header = TSHeader::new(0x0100).with_adaptation_field_control(AFC_ADAPTATION_AND_PAYLOAD);
        assert!(header.has_adaptation_field());
        assert!(header.has_payload());
        assert_eq!(&header.to_bytes().unwrap()[..], &[0x47, 0x01, 0x00, 0x30]);

        let header = TSHeader::new(0x0100).with_adaptation_field_control(AFC_ADAPTATION_ONLY);
        assert!(!header.has_payload());
    }

    #[test]
    fn test_header_rejects_wide_pid() {
        assert!(matches!(
            TSHeader::new(0x2000).to_bytes(),
            Err(MuxError::InvalidField(_))
        ));
    }

    #[test]
    fn test_pcr_layout() {
        let pcr = Pcr {
            base: 0x1_0000_0001,
            extension: 0x101,
        };
        let bytes = pcr.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x80, 0x00, 0x00, 0x00, 0xFF, 0x01]);

        let pcr = Pcr::from_90khz(90_000);
        assert_eq!(&pcr.to_bytes().unwrap()[..], &[0x00, 0x00, 0xAF, 0xC8, 0x7E, 0x00]);
    }

    #[test]
    fn test_pcr_clock_conversion() {
        let pcr = Pcr::from_27mhz(27_000_301);
        assert_eq!(pcr.base, 90_001);
        assert_eq!(pcr.extension, 1);
        assert_eq!(pcr.as_27mhz(), 27_000_301);

        let pcr = Pcr::from_duration(Duration::from_secs(2));
        assert_eq!(pcr.base, 180_000);
        assert_eq!(pcr.to_duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_adaptation_field_with_pcr() {
        let field = AdaptationField::default()
            .with_pcr(Pcr::from_90khz(0))
            .with_random_access(true);
        assert_eq!(field.length, 7);
        let bytes = field.to_bytes().unwrap();
        assert_eq!(
            &bytes[..],
            &[0x07, 0x50, 0x00, 0x00, 0x00, 0x00, 0x7E, 0x00]
        );
    }

    #[test]
    fn test_adaptation_field_stuffing() {
        // Single stuffing byte form
        let bytes = AdaptationField::stuffing(0).to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x00]);

        let bytes = AdaptationField::stuffing(4).to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x04, 0x00, 0xFF, 0xFF, 0xFF]);

        let mut field = AdaptationField::default().with_pcr(Pcr::from_90khz(1));
        field.length += 3;
        let bytes = field.to_bytes().unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(&bytes[8..], &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_adaptation_field_overflow() {
        let mut field = AdaptationField::default().with_pcr(Pcr::from_90khz(1));
        field.length = 3;
        assert!(matches!(
            field.to_bytes(),
            Err(MuxError::CapacityExceeded { what: "adaptation field", .. })
        ));
    }

    #[test]
    fn test_adaptation_field_optional_records() {
        let mut field = AdaptationField {
            opcr: Some(Pcr::from_90khz(2)),
            splice_countdown: Some(-1),
            private_data: Some(vec![0xAA, 0xBB]),
            ..Default::default()
        };
        field.fit();
        assert_eq!(field.length, 1 + 6 + 1 + 3);
        let bytes = field.to_bytes().unwrap();
        assert_eq!(bytes[1], 0x0E);
        assert_eq!(&bytes[8..], &[0xFF, 0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn test_pts_conversion() {
        assert_eq!(time_to_pts(Duration::from_secs(1)), 90_000);
        assert_eq!(pts_to_time(45_000), Duration::from_millis(500));
    }
}
