use super::types::*;
use crate::error::{MuxError, Result};
use crate::utils::BitBuffer;
use bytes::Bytes;

/// A 188-byte transport packet.
///
/// The adaptation field is written only when the header's control bits
/// declare one, the payload only when they declare a payload. Whatever space
/// remains is filled with stuffing bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct TSPacket {
    pub header: TSHeader,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: Bytes,
}

impl TSPacket {
    pub fn new(header: TSHeader, adaptation_field: Option<AdaptationField>, payload: Bytes) -> Self {
        Self {
            header,
            adaptation_field,
            payload,
        }
    }

    /// Payload bytes that fit beside the given adaptation field
    pub fn payload_capacity(adaptation_field: Option<&AdaptationField>) -> usize {
        TS_PAYLOAD_SIZE - adaptation_field.map_or(0, Encode::encoded_len)
    }

    fn adaptation_field_len(&self) -> Result<usize> {
        if !self.header.has_adaptation_field() {
            return Ok(0);
        }
        self.adaptation_field
            .as_ref()
            .map(Encode::encoded_len)
            .ok_or_else(|| {
                MuxError::InvalidField(
                    "adaptation field control declares a missing adaptation field".into(),
                )
            })
    }

    fn payload_len(&self) -> usize {
        if self.header.has_payload() {
            self.payload.len()
        } else {
            0
        }
    }
}

impl Encode for TSPacket {
    fn encoded_len(&self) -> usize {
        TS_PACKET_SIZE
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        let needed = TS_HEADER_SIZE + self.adaptation_field_len()? + self.payload_len();
        if needed > TS_PACKET_SIZE {
            return Err(MuxError::CapacityExceeded {
                what: "transport packet",
                needed,
                capacity: TS_PACKET_SIZE,
            });
        }

        buf.push_bytes(&self.header.to_bytes()?)?;
        if self.header.has_adaptation_field() {
            if let Some(field) = &self.adaptation_field {
                buf.push_bytes(&field.to_bytes()?)?;
            }
        }
        if self.header.has_payload() {
            buf.push_bytes(&self.payload)?;
        }
        buf.fill_remaining(STUFFING_BYTE)
    }
}

/// A PSI section carried in a single transport packet.
#[derive(Debug, Clone, PartialEq)]
pub struct PsiPacket<S> {
    pub header: TSHeader,
    /// Bytes between the pointer field and the start of the section
    pub pointer_field: u8,
    pub section: S,
}

impl<S: Encode> PsiPacket<S> {
    /// Payload-unit-start packet on `pid` carrying `section`
    pub fn new(pid: u16, section: S, continuity_counter: u8) -> Self {
        Self {
            header: TSHeader::new(pid)
                .with_payload_unit_start(true)
                .with_continuity_counter(continuity_counter),
            pointer_field: 0,
            section,
        }
    }
}

impl<S: Encode> Encode for PsiPacket<S> {
    fn encoded_len(&self) -> usize {
        TS_PACKET_SIZE
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        let needed =
            TS_HEADER_SIZE + 1 + self.pointer_field as usize + self.section.encoded_len();
        if needed > TS_PACKET_SIZE {
            return Err(MuxError::CapacityExceeded {
                what: "PSI packet",
                needed,
                capacity: TS_PACKET_SIZE,
            });
        }

        buf.push_bytes(&self.header.to_bytes()?)?;
        buf.push_aligned_byte(self.pointer_field)?;
        for _ in 0..self.pointer_field {
            buf.push_aligned_byte(STUFFING_BYTE)?;
        }
        buf.push_bytes(&self.section.to_bytes()?)?;
        buf.fill_remaining(STUFFING_BYTE)
    }
}
