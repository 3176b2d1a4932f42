use super::psi::{Descriptor, PatEntry, PatSection, PmtSection, PmtStream};
use super::types::*;
use crate::error::{MuxError, Result};
use crate::utils::Crc32Mpeg2;

/// A transport packet split into its parts, borrowing the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket<'a> {
    pub header: TSHeader,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: &'a [u8],
}

/// A PSI section whose CRC and length have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiSection<'a> {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    /// Bytes after the length field, CRC included
    pub section_length: usize,
    /// Transport stream id for the PAT, program number for the PMT
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Table body between the last section number and the CRC
    pub body: &'a [u8],
}

/// Reads transport packets and PSI sections back into their typed form.
#[derive(Debug, Default, Clone, Copy)]
pub struct TSPacketParser;

impl TSPacketParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(MuxError::Parser("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(MuxError::Parser(format!("invalid sync byte {:#04x}", data[0])));
        }

        Ok(TSHeader {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Parses a whole 188-byte packet
    pub fn parse_packet<'a>(&self, data: &'a [u8]) -> Result<ParsedPacket<'a>> {
        if data.len() != TS_PACKET_SIZE {
            return Err(MuxError::Parser(format!(
                "TS packet of {} bytes",
                data.len()
            )));
        }
        let header = self.parse_header(data)?;

        let mut payload_start = TS_HEADER_SIZE;
        let adaptation_field = if header.has_adaptation_field() {
            let field = self.parse_adaptation_field(&data[TS_HEADER_SIZE..])?;
            payload_start += field.length as usize + 1;
            if payload_start > TS_PACKET_SIZE {
                return Err(MuxError::Parser("adaptation field overruns packet".into()));
            }
            Some(field)
        } else {
            None
        };

        let payload: &[u8] = if header.has_payload() {
            &data[payload_start..]
        } else {
            &[]
        };
        Ok(ParsedPacket {
            header,
            adaptation_field,
            payload,
        })
    }

    /// Parses an adaptation field starting at its length byte
    pub fn parse_adaptation_field(&self, data: &[u8]) -> Result<AdaptationField> {
        let length = *data
            .first()
            .ok_or_else(|| MuxError::Parser("adaptation field length missing".into()))?;
        let mut field = AdaptationField::stuffing(length);
        if length == 0 {
            return Ok(field);
        }

        let length = length as usize;
        if data.len() < length + 1 {
            return Err(MuxError::Parser("adaptation field too short".into()));
        }
        let data = &data[..length + 1];

        let flags = data[1];
        field.discontinuity = (flags & 0x80) != 0;
        field.random_access = (flags & 0x40) != 0;
        field.es_priority = (flags & 0x20) != 0;

        let mut pos = 2;

        if flags & 0x10 != 0 {
            field.pcr = Some(parse_pcr(data, pos)?);
            pos += PCR_SIZE;
        }

        if flags & 0x08 != 0 {
            field.opcr = Some(parse_pcr(data, pos)?);
            pos += PCR_SIZE;
        }

        if flags & 0x04 != 0 {
            let countdown = data
                .get(pos)
                .ok_or_else(|| MuxError::Parser("splice countdown too short".into()))?;
            field.splice_countdown = Some(*countdown as i8);
            pos += 1;
        }

        if flags & 0x02 != 0 {
            let private_length = *data
                .get(pos)
                .ok_or_else(|| MuxError::Parser("private data length byte missing".into()))?
                as usize;
            pos += 1;
            if data.len() < pos + private_length {
                return Err(MuxError::Parser("private data too short".into()));
            }
            field.private_data = Some(data[pos..pos + private_length].to_vec());
        }
        Ok(field)
    }

    /// Parses a PSI section from a packet payload, honoring the pointer field.
    ///
    /// The CRC trailer must match the section bytes.
    pub fn parse_section<'a>(&self, payload: &'a [u8]) -> Result<PsiSection<'a>> {
        let pointer = *payload
            .first()
            .ok_or_else(|| MuxError::Parser("pointer field missing".into()))? as usize;
        let data = payload
            .get(1 + pointer..)
            .ok_or_else(|| MuxError::Parser("pointer field past payload".into()))?;
        if data.len() < 8 {
            return Err(MuxError::Parser("PSI section header too short".into()));
        }

        let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
        if section_length < 9 {
            return Err(MuxError::Parser(format!(
                "section length {} too small",
                section_length
            )));
        }
        let total = 3 + section_length;
        if data.len() < total {
            return Err(MuxError::Parser(format!(
                "section length {} exceeds the {} bytes present",
                section_length,
                data.len() - 3
            )));
        }

        let section = &data[..total];
        if !Crc32Mpeg2::verify(section) {
            return Err(MuxError::Parser("PSI section CRC mismatch".into()));
        }

        Ok(PsiSection {
            table_id: data[0],
            section_syntax_indicator: (data[1] & 0x80) != 0,
            section_length,
            table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
            version: (data[5] >> 1) & 0x1F,
            current_next: (data[5] & 0x01) != 0,
            section_number: data[6],
            last_section_number: data[7],
            body: &section[8..total - 4],
        })
    }

    pub fn parse_pat(&self, section: &PsiSection<'_>) -> Result<PatSection> {
        if section.table_id != TABLE_ID_PAT {
            return Err(MuxError::Parser(format!(
                "table id {:#04x} is not a PAT",
                section.table_id
            )));
        }
        let data = section.body;
        if data.len() % 4 != 0 {
            return Err(MuxError::Parser("PAT body is not whole entries".into()));
        }

        let programs = data
            .chunks(4)
            .map(|entry| PatEntry {
                program_number: ((entry[0] as u16) << 8) | entry[1] as u16,
                program_map_pid: ((entry[2] as u16 & 0x1F) << 8) | entry[3] as u16,
            })
            .collect();

        Ok(PatSection {
            table_id: section.table_id,
            section_syntax_indicator: section.section_syntax_indicator,
            transport_stream_id: section.table_id_extension,
            version: section.version,
            current_next: section.current_next,
            section_number: section.section_number,
            last_section_number: section.last_section_number,
            programs,
        })
    }

    pub fn parse_pmt(&self, section: &PsiSection<'_>) -> Result<PmtSection> {
        if section.table_id != TABLE_ID_PMT {
            return Err(MuxError::Parser(format!(
                "table id {:#04x} is not a PMT",
                section.table_id
            )));
        }
        let data = section.body;
        let end = data.len();
        let mut pos = 0;

        if pos + 4 > end {
            return Err(MuxError::Parser("PMT too short for PCR PID".into()));
        }
        let pcr_pid = ((data[pos] as u16 & 0x1F) << 8) | data[pos + 1] as u16;
        let program_info_length = ((data[pos + 2] as usize & 0x0F) << 8) | data[pos + 3] as usize;
        pos += 4;

        if pos + program_info_length > end {
            return Err(MuxError::Parser("program info data too short".into()));
        }
        let program_descriptors = self.parse_descriptors(&data[pos..pos + program_info_length])?;
        pos += program_info_length;

        let mut streams = Vec::new();
        while pos < end {
            if pos + 5 > end {
                return Err(MuxError::Parser("truncated PMT stream entry".into()));
            }
            let stream_type = data[pos];
            let elementary_pid = ((data[pos + 1] as u16 & 0x1F) << 8) | data[pos + 2] as u16;
            let es_info_length = ((data[pos + 3] as usize & 0x0F) << 8) | data[pos + 4] as usize;
            pos += 5;

            if pos + es_info_length > end {
                return Err(MuxError::Parser("ES info data too short".into()));
            }
            let descriptors = self.parse_descriptors(&data[pos..pos + es_info_length])?;
            pos += es_info_length;

            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(PmtSection {
            table_id: section.table_id,
            section_syntax_indicator: section.section_syntax_indicator,
            program_number: section.table_id_extension,
            version: section.version,
            current_next: section.current_next,
            section_number: section.section_number,
            last_section_number: section.last_section_number,
            pcr_pid,
            program_descriptors,
            streams,
        })
    }

    fn parse_descriptors(&self, data: &[u8]) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(MuxError::Parser("descriptor header truncated".into()));
            }
            let tag = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(MuxError::Parser("descriptor data too short".into()));
            }

            descriptors.push(Descriptor {
                tag,
                data: data[pos..pos + length].to_vec(),
            });
            pos += length;
        }

        Ok(descriptors)
    }
}

fn parse_pcr(data: &[u8], pos: usize) -> Result<Pcr> {
    let bytes = data
        .get(pos..pos + PCR_SIZE)
        .ok_or_else(|| MuxError::Parser("PCR data too short".into()))?;
    let base = ((bytes[0] as u64) << 25)
        | ((bytes[1] as u64) << 17)
        | ((bytes[2] as u64) << 9)
        | ((bytes[3] as u64) << 1)
        | ((bytes[4] & 0x80) as u64 >> 7);
    let extension = (((bytes[4] & 0x01) as u16) << 8) | bytes[5] as u16;
    Ok(Pcr { base, extension })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TsConfig;
    use crate::format::ts::packet::{PsiPacket, TSPacket};
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_ts_header() {
        let parser = TSPacketParser::new();
        let data = [
            0x47, // Sync byte
            0x40, // Payload unit start indicator set
            0x00, // PID (low bits)
            0x1A, // Payload only, continuity counter 10
        ];

        let header = parser.parse_header(&data).unwrap();
        assert!(header.payload_unit_start);
        assert_eq!(header.pid, 0);
        assert_eq!(header.adaptation_field_control, AFC_PAYLOAD_ONLY);
        assert_eq!(header.continuity_counter, 10);

        assert!(matches!(
            parser.parse_header(&[0x46, 0, 0, 0]),
            Err(MuxError::Parser(_))
        ));
    }

    #[test]
    fn test_parse_packet_with_pcr() {
        let field = AdaptationField::default()
            .with_random_access(true)
            .with_pcr(Pcr::from_27mhz(27_000_123));
        let packet = TSPacket::new(
            TSHeader::new(PID_VIDEO)
                .with_payload_unit_start(true)
                .with_adaptation_field_control(AFC_ADAPTATION_AND_PAYLOAD)
                .with_continuity_counter(7),
            Some(field.clone()),
            Bytes::from_static(&[1, 2, 3]),
        )
        .to_bytes()
        .unwrap();

        let parsed = TSPacketParser::new().parse_packet(&packet).unwrap();
        assert_eq!(parsed.header.pid, PID_VIDEO);
        assert_eq!(parsed.header.continuity_counter, 7);
        assert_eq!(parsed.adaptation_field, Some(field));
        assert_eq!(&parsed.payload[..3], &[1, 2, 3]);
        assert_eq!(parsed.payload.len(), 176);
    }

    #[test]
    fn test_round_trip_default_tables() {
        let parser = TSPacketParser::new();
        let config = TsConfig::default().with_audio(true);

        let pat = PatSection::from_config(&config);
        let bytes = PsiPacket::new(PID_PAT, pat.clone(), 0).to_bytes().unwrap();
        let packet = parser.parse_packet(&bytes).unwrap();
        let section = parser.parse_section(packet.payload).unwrap();
        assert_eq!(section.section_length, pat.section_length());
        assert_eq!(parser.parse_pat(&section).unwrap(), pat);

        let pmt = PmtSection::from_config(&config);
        let bytes = PsiPacket::new(config.pmt_pid, pmt.clone(), 0).to_bytes().unwrap();
        let packet = parser.parse_packet(&bytes).unwrap();
        let section = parser.parse_section(packet.payload).unwrap();
        assert_eq!(parser.parse_pmt(&section).unwrap(), pmt);
        assert!(parser.parse_pat(&section).is_err());
    }

    #[test]
    fn test_section_crc_mismatch() {
        let parser = TSPacketParser::new();
        let mut bytes = PsiPacket::new(PID_PAT, PatSection::from_config(&TsConfig::default()), 0)
            .to_bytes()
            .unwrap()
            .to_vec();
        bytes[13] ^= 0x01;
        let packet = parser.parse_packet(&bytes).unwrap();
        assert!(matches!(
            parser.parse_section(packet.payload),
            Err(MuxError::Parser(_))
        ));
    }

    #[test]
    fn test_parse_pat_entries() {
        let parser = TSPacketParser::new();
        let body = [
            0x00, 0x01, // Program number
            0xF0, 0x00, // PID
            0x00, 0x02, // Program number
            0xE0, 0x20, // PID
        ];
        let section = PsiSection {
            table_id: TABLE_ID_PAT,
            section_syntax_indicator: true,
            section_length: 17,
            table_id_extension: 1,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
            body: &body,
        };

        let pat = parser.parse_pat(&section).unwrap();
        assert_eq!(pat.programs.len(), 2);
        assert_eq!(pat.programs[0].program_map_pid, 0x1000);
        assert_eq!(pat.programs[1].program_number, 2);
        assert_eq!(pat.programs[1].program_map_pid, 0x0020);
    }
}
