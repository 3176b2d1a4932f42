//! Program-specific information: the PAT and PMT sections.
//!
//! Both sections compute their `section_length` from content. The value
//! counts every byte after the length field up to and including the CRC
//! trailer, so a serialized section is always `section_length + 3` bytes long.

use super::types::*;
use crate::config::TsConfig;
use crate::error::{MuxError, Result};
use crate::utils::BitBuffer;

/// Bytes between the end of the length field and the first sub-entry
const PAT_FIXED_LEN: usize = 5;
const PMT_FIXED_LEN: usize = 9;
const CRC_LEN: usize = 4;
const SECTION_HEADER_LEN: usize = 3;
const MAX_SECTION_LENGTH: usize = 1021;

fn check_section_length(section_length: usize) -> Result<()> {
    if section_length > MAX_SECTION_LENGTH {
        return Err(MuxError::CapacityExceeded {
            what: "PSI section",
            needed: section_length,
            capacity: MAX_SECTION_LENGTH,
        });
    }
    Ok(())
}

/// Writes the fields shared by PAT and PMT up to the last section number
#[allow(clippy::too_many_arguments)]
fn write_table_header(
    buf: &mut BitBuffer,
    table_id: u8,
    section_syntax_indicator: bool,
    section_length: usize,
    table_id_extension: u16,
    version: u8,
    current_next: bool,
    section_number: u8,
    last_section_number: u8,
) -> Result<()> {
    buf.push_aligned_byte(table_id)?;
    buf.push_flag(section_syntax_indicator)?;
    buf.push_flag(false)?; // Private
    buf.push_uint(0b11, 2)?; // Reserved
    buf.push_uint(section_length as u64, 12)?;
    buf.push_uint(table_id_extension as u64, 16)?;
    buf.push_uint(0b11, 2)?; // Reserved
    buf.push_uint(version as u64, 5)?;
    buf.push_flag(current_next)?;
    buf.push_aligned_byte(section_number)?;
    buf.push_aligned_byte(last_section_number)
}

/// One program of the PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    /// PMT PID, or the network PID for program 0
    pub program_map_pid: u16,
}

impl Encode for PatEntry {
    fn encoded_len(&self) -> usize {
        4
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        buf.push_uint(self.program_number as u64, 16)?;
        buf.push_uint(0b111, 3)?; // Reserved
        buf.push_uint(self.program_map_pid as u64, 13)
    }
}

/// Program association section.
#[derive(Debug, Clone, PartialEq)]
pub struct PatSection {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub transport_stream_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub programs: Vec<PatEntry>,
}

impl Default for PatSection {
    fn default() -> Self {
        Self {
            table_id: TABLE_ID_PAT,
            section_syntax_indicator: true,
            transport_stream_id: 1,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
            programs: Vec::new(),
        }
    }
}

impl PatSection {
    pub fn new(transport_stream_id: u16) -> Self {
        Self {
            transport_stream_id,
            ..Default::default()
        }
    }

    /// Single-program PAT described by `config`
    pub fn from_config(config: &TsConfig) -> Self {
        Self::new(config.transport_stream_id).with_program(config.program_number, config.pmt_pid)
    }

    pub fn with_program(mut self, program_number: u16, program_map_pid: u16) -> Self {
        self.programs.push(PatEntry {
            program_number,
            program_map_pid,
        });
        self
    }

    pub fn section_length(&self) -> usize {
        PAT_FIXED_LEN + self.programs.len() * 4 + CRC_LEN
    }
}

impl Encode for PatSection {
    fn encoded_len(&self) -> usize {
        SECTION_HEADER_LEN + self.section_length()
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        let section_length = self.section_length();
        check_section_length(section_length)?;

        write_table_header(
            buf,
            self.table_id,
            self.section_syntax_indicator,
            section_length,
            self.transport_stream_id,
            self.version,
            self.current_next,
            self.section_number,
            self.last_section_number,
        )?;
        for program in &self.programs {
            buf.push_bytes(&program.to_bytes()?)?;
        }

        let crc = buf.checksum();
        buf.push_uint(crc as u64, 32)
    }
}

/// A descriptor: tag, length and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

impl Descriptor {
    /// ISO 639 language descriptor with audio type 0
    pub fn language(code: &[u8; 3]) -> Self {
        Self {
            tag: DESCRIPTOR_TAG_LANGUAGE,
            data: vec![code[0], code[1], code[2], 0x00],
        }
    }
}

impl Encode for Descriptor {
    fn encoded_len(&self) -> usize {
        2 + self.data.len()
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        if self.data.len() > u8::MAX as usize {
            return Err(MuxError::CapacityExceeded {
                what: "descriptor",
                needed: self.data.len(),
                capacity: u8::MAX as usize,
            });
        }
        buf.push_aligned_byte(self.tag)?;
        buf.push_aligned_byte(self.data.len() as u8)?;
        buf.push_bytes(&self.data)
    }
}

fn descriptors_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(Encode::encoded_len).sum()
}

fn write_descriptors(buf: &mut BitBuffer, descriptors: &[Descriptor]) -> Result<()> {
    for descriptor in descriptors {
        buf.push_bytes(&descriptor.to_bytes()?)?;
    }
    Ok(())
}

/// One elementary stream of the PMT.
#[derive(Debug, Clone, PartialEq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl PmtStream {
    pub fn h264(pid: u16) -> Self {
        Self {
            stream_type: STREAM_TYPE_H264,
            elementary_pid: pid,
            descriptors: Vec::new(),
        }
    }

    /// AAC stream tagged with the undetermined language
    pub fn aac(pid: u16) -> Self {
        Self {
            stream_type: STREAM_TYPE_AAC,
            elementary_pid: pid,
            descriptors: vec![Descriptor::language(b"und")],
        }
    }

    pub fn es_info_length(&self) -> usize {
        descriptors_len(&self.descriptors)
    }
}

impl Encode for PmtStream {
    fn encoded_len(&self) -> usize {
        5 + self.es_info_length()
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        buf.push_aligned_byte(self.stream_type)?;
        buf.push_uint(0b111, 3)?; // Reserved
        buf.push_uint(self.elementary_pid as u64, 13)?;
        buf.push_uint(0b1111, 4)?; // Reserved
        buf.push_uint(self.es_info_length() as u64, 12)?;
        write_descriptors(buf, &self.descriptors)
    }
}

/// Program map section.
#[derive(Debug, Clone, PartialEq)]
pub struct PmtSection {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub program_number: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub streams: Vec<PmtStream>,
}

impl Default for PmtSection {
    fn default() -> Self {
        Self {
            table_id: TABLE_ID_PMT,
            section_syntax_indicator: true,
            program_number: 1,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
            pcr_pid: PID_VIDEO,
            program_descriptors: Vec::new(),
            streams: Vec::new(),
        }
    }
}

impl PmtSection {
    pub fn new(program_number: u16, pcr_pid: u16) -> Self {
        Self {
            program_number,
            pcr_pid,
            ..Default::default()
        }
    }

    /// H.264 video, plus AAC audio when the config enables it
    pub fn from_config(config: &TsConfig) -> Self {
        let pmt = Self::new(config.program_number, config.pcr_pid())
            .with_stream(PmtStream::h264(config.video_pid));
        if config.audio_enabled {
            pmt.with_stream(PmtStream::aac(config.audio_pid))
        } else {
            pmt
        }
    }

    pub fn with_stream(mut self, stream: PmtStream) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn program_info_length(&self) -> usize {
        descriptors_len(&self.program_descriptors)
    }

    pub fn section_length(&self) -> usize {
        PMT_FIXED_LEN
            + self.program_info_length()
            + self.streams.iter().map(Encode::encoded_len).sum::<usize>()
            + CRC_LEN
    }
}

impl Encode for PmtSection {
    fn encoded_len(&self) -> usize {
        SECTION_HEADER_LEN + self.section_length()
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        let section_length = self.section_length();
        check_section_length(section_length)?;

        write_table_header(
            buf,
            self.table_id,
            self.section_syntax_indicator,
            section_length,
            self.program_number,
            self.version,
            self.current_next,
            self.section_number,
            self.last_section_number,
        )?;
        buf.push_uint(0b111, 3)?; // Reserved
        buf.push_uint(self.pcr_pid as u64, 13)?;
        buf.push_uint(0b1111, 4)?; // Reserved
        buf.push_uint(self.program_info_length() as u64, 12)?;
        write_descriptors(buf, &self.program_descriptors)?;

        for stream in &self.streams {
            buf.push_bytes(&stream.to_bytes()?)?;
        }

        let crc = buf.checksum();
        buf.push_uint(crc as u64, 32)
    }
}
