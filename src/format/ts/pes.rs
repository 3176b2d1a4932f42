use super::types::{Encode, STREAM_ID_AAC, STREAM_ID_H264, TIMESTAMP_MAX};
use crate::av::{AudioConfig, CodecType, SampleRecord, StreamInfo};
use crate::error::{MuxError, Result};
use crate::utils::BitBuffer;
use bytes::{BufMut, Bytes, BytesMut};

/// Annex B start code written before every NAL unit
const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Access unit delimiter NAL opening every video access unit
const ACCESS_UNIT_DELIMITER: [u8; 2] = [0x09, 0xF0];

/// Fixed part of the PES header, through the header data length byte
const PES_HEADER_FIXED_SIZE: usize = 9;

/// Bytes of the header that the packet length field does not count
const PES_LENGTH_EXCLUDED: usize = 6;

/// Size of an ADTS header without CRC
pub const ADTS_HEADER_SIZE: usize = 7;

/// Packetized Elementary Stream (PES) header.
///
/// Only the PTS/DTS optional fields are supported; every other optional
/// flag is written as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Bytes following the length field, or 0 for an unbounded video packet
    pub packet_length: u16,
    /// Scrambling mode, 2 bits
    pub scrambling_control: u8,
    pub priority: bool,
    /// Payload starts with an access unit
    pub data_alignment: bool,
    pub copyright: bool,
    pub original: bool,
    /// Presentation timestamp, 90 kHz
    pub pts: Option<u64>,
    /// Decoding timestamp, 90 kHz
    pub dts: Option<u64>,
}

impl PesHeader {
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Sets both timestamps, leaving DTS out when it equals PTS
    pub fn with_timestamps(mut self, pts: u64, dts: u64) -> Self {
        self.pts = Some(pts);
        self.dts = (dts != pts).then_some(dts);
        self
    }

    pub fn with_data_alignment(mut self, aligned: bool) -> Self {
        self.data_alignment = aligned;
        self
    }

    pub fn with_packet_length(mut self, length: u16) -> Self {
        self.packet_length = length;
        self
    }

    fn pts_dts_flags(&self) -> u8 {
        match (self.pts, self.dts) {
            (Some(_), Some(_)) => 0b11,
            (Some(_), None) => 0b10,
            _ => 0b00,
        }
    }

    /// Bytes of optional fields after the header data length byte
    pub fn header_data_length(&self) -> usize {
        match self.pts_dts_flags() {
            0b11 => 10,
            0b10 => 5,
            _ => 0,
        }
    }
}

impl Encode for PesHeader {
    fn encoded_len(&self) -> usize {
        PES_HEADER_FIXED_SIZE + self.header_data_length()
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        if self.dts.is_some() && self.pts.is_none() {
            return Err(MuxError::InvalidField("PES header with DTS but no PTS".into()));
        }

        buf.push_uint(0x000001, 24)?;
        buf.push_uint(self.stream_id as u64, 8)?;
        buf.push_uint(self.packet_length as u64, 16)?;

        buf.push_uint(0b10, 2)?;
        buf.push_uint(self.scrambling_control as u64, 2)?;
        buf.push_flag(self.priority)?;
        buf.push_flag(self.data_alignment)?;
        buf.push_flag(self.copyright)?;
        buf.push_flag(self.original)?;

        let flags = self.pts_dts_flags();
        buf.push_uint(flags as u64, 2)?;
        // ESCR, ES rate, trick mode, copy info, CRC and extension
        buf.push_uint(0, 6)?;
        buf.push_uint(self.header_data_length() as u64, 8)?;

        if let Some(pts) = self.pts {
            write_timestamp(buf, flags, pts)?;
        }
        if let Some(dts) = self.dts {
            write_timestamp(buf, 0b0001, dts)?;
        }
        Ok(())
    }
}

/// Writes a 33-bit timestamp as 4 prefix bits and three marker-terminated
/// groups of 3, 15 and 15 bits.
fn write_timestamp(buf: &mut BitBuffer, prefix: u8, ts: u64) -> Result<()> {
    if ts > TIMESTAMP_MAX {
        return Err(MuxError::InvalidField(format!(
            "timestamp {} exceeds 33 bits",
            ts
        )));
    }
    buf.push_uint(prefix as u64, 4)?;
    buf.push_uint((ts >> 30) & 0x07, 3)?;
    buf.push_flag(true)?;
    buf.push_uint((ts >> 15) & 0x7FFF, 15)?;
    buf.push_flag(true)?;
    buf.push_uint(ts & 0x7FFF, 15)?;
    buf.push_flag(true)
}

/// ADTS header framing one raw AAC access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub config: AudioConfig,
    /// Frame length including this header, 13 bits
    pub frame_length: u16,
}

impl AdtsHeader {
    /// Header for an access unit of `payload_len` bytes
    pub fn new(config: AudioConfig, payload_len: usize) -> Result<Self> {
        let frame_length = ADTS_HEADER_SIZE + payload_len;
        if frame_length > 0x1FFF {
            return Err(MuxError::CapacityExceeded {
                what: "ADTS frame",
                needed: frame_length,
                capacity: 0x1FFF,
            });
        }
        Ok(Self {
            config,
            frame_length: frame_length as u16,
        })
    }
}

impl Encode for AdtsHeader {
    fn encoded_len(&self) -> usize {
        ADTS_HEADER_SIZE
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        let profile = match self.config.object_type {
            1..=4 => self.config.object_type - 1,
            other => {
                return Err(MuxError::InvalidField(format!(
                    "audio object type {} has no ADTS profile",
                    other
                )))
            }
        };

        buf.push_uint(0xFFF, 12)?;
        // MPEG-4, layer 0, no CRC
        buf.push_uint(0b0001, 4)?;
        buf.push_uint(profile as u64, 2)?;
        buf.push_uint(self.config.sampling_frequency_index as u64, 4)?;
        buf.push_flag(false)?;
        buf.push_uint(self.config.channel_configuration as u64, 3)?;
        buf.push_uint(0, 4)?;
        buf.push_uint(self.frame_length as u64, 13)?;
        // VBR buffer fullness, one raw data block
        buf.push_uint(0x7FF, 11)?;
        buf.push_uint(0, 2)
    }
}

/// A complete PES packet: header and elementary-stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket {
    pub header: PesHeader,
    pub payload: Bytes,
}

impl PesPacket {
    pub fn new(header: PesHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Builds the PES packet carrying one timed sample of `stream`
    pub fn from_record(stream: &StreamInfo, record: &SampleRecord) -> Result<Self> {
        match stream.codec {
            CodecType::H264 => Self::video(stream, record),
            CodecType::AAC => Self::audio(stream, record),
        }
    }

    /// Annex B access unit: a delimiter then every NAL unit behind a start code
    fn video(stream: &StreamInfo, record: &SampleRecord) -> Result<Self> {
        let size = START_CODE.len() + ACCESS_UNIT_DELIMITER.len()
            + record
                .nal_units
                .iter()
                .map(|nal| START_CODE.len() + nal.size as usize)
                .sum::<usize>();
        let mut payload = BytesMut::with_capacity(size);
        payload.put_slice(&START_CODE);
        payload.put_slice(&ACCESS_UNIT_DELIMITER);
        for nal in &record.nal_units {
            payload.put_slice(&START_CODE);
            payload.put_slice(&stream.media_data.slice(nal.offset, nal.size as usize)?);
        }

        let header = PesHeader::new(STREAM_ID_H264)
            .with_timestamps(record.cts, record.dts)
            .with_data_alignment(true);
        Ok(Self::new(header, payload.freeze()))
    }

    fn audio(stream: &StreamInfo, record: &SampleRecord) -> Result<Self> {
        let config = stream.audio_config.ok_or_else(|| {
            MuxError::MalformedInput("AAC stream without an AudioSpecificConfig".into())
        })?;
        let frame = stream.media_data.slice(record.offset, record.size as usize)?;
        let adts = AdtsHeader::new(config, frame.len())?;

        let mut payload = BytesMut::with_capacity(ADTS_HEADER_SIZE + frame.len());
        payload.put_slice(&adts.to_bytes()?);
        payload.put_slice(&frame);

        let mut header = PesHeader::new(STREAM_ID_AAC)
            .with_timestamps(record.cts, record.dts)
            .with_data_alignment(true);
        let length = header.encoded_len() - PES_LENGTH_EXCLUDED + payload.len();
        header.packet_length = u16::try_from(length).map_err(|_| MuxError::CapacityExceeded {
            what: "PES packet length",
            needed: length,
            capacity: u16::MAX as usize,
        })?;
        Ok(Self::new(header, payload.freeze()))
    }
}

impl Encode for PesPacket {
    fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.payload.len()
    }

    fn write_to(&self, buf: &mut BitBuffer) -> Result<()> {
        self.header.write_to(buf)?;
        buf.push_bytes(&self.payload)
    }
}
