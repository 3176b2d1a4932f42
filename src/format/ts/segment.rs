use super::packet::{PsiPacket, TSPacket};
use super::pes::PesPacket;
use super::psi::{PatSection, PmtSection};
use super::types::*;
use crate::av::{SampleRecord, StreamInfo};
use crate::config::TsConfig;
use crate::error::{MuxError, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt::Write;

/// Receives every transport packet once it has been encoded.
pub trait PacketObserver {
    fn on_packet(&mut self, pid: u16, packet: &[u8]);
}

/// Observer that ignores every packet.
struct Discard;

impl PacketObserver for Discard {
    fn on_packet(&mut self, _pid: u16, _packet: &[u8]) {}
}

/// Logs a hex dump of each packet at `trace` level.
#[derive(Debug, Default)]
pub struct HexDumpObserver {
    packets: usize,
}

impl HexDumpObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets seen so far
    pub fn packets(&self) -> usize {
        self.packets
    }
}

impl PacketObserver for HexDumpObserver {
    fn on_packet(&mut self, pid: u16, packet: &[u8]) {
        self.packets += 1;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "packet {} on PID {:#06x}:\n{}",
                self.packets,
                pid,
                hex_dump(packet)
            );
        }
    }
}

/// Sixteen space-separated bytes per line, prefixed with the line offset
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 + data.len() / 16 * 6);
    for (line, chunk) in data.chunks(16).enumerate() {
        if line > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:04x}:", line * 16);
        for byte in chunk {
            let _ = write!(out, " {:02x}", byte);
        }
    }
    out
}

/// The timed samples of one track, ready to be packetized.
#[derive(Debug, Clone, Copy)]
pub struct TrackFragment<'a> {
    pub stream: &'a StreamInfo,
    pub records: &'a [SampleRecord],
}

impl<'a> TrackFragment<'a> {
    pub fn new(stream: &'a StreamInfo, records: &'a [SampleRecord]) -> Self {
        Self { stream, records }
    }
}

/// Assembles complete HLS transport-stream segments.
///
/// A segment opens with the PAT and PMT, followed by one PES packet per
/// sample of every track, interleaved by decode time. Continuity counters
/// persist across segments built by the same assembler.
#[derive(Debug)]
pub struct SegmentAssembler {
    config: TsConfig,
    continuity: HashMap<u16, u8>,
}

impl SegmentAssembler {
    pub fn new(config: TsConfig) -> Self {
        Self {
            config,
            continuity: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TsConfig {
        &self.config
    }

    /// Restarts every continuity counter at zero
    pub fn reset(&mut self) {
        self.continuity.clear();
    }

    /// Encodes one segment from the given tracks
    pub fn assemble(&mut self, tracks: &[TrackFragment<'_>]) -> Result<Bytes> {
        self.assemble_with(tracks, &mut Discard)
    }

    /// Encodes one segment, passing every packet to `observer`.
    ///
    /// On error no segment is returned and the continuity counters are left
    /// where they were before the call.
    pub fn assemble_with(
        &mut self,
        tracks: &[TrackFragment<'_>],
        observer: &mut dyn PacketObserver,
    ) -> Result<Bytes> {
        let saved = self.continuity.clone();
        let result = self.encode_segment(tracks, observer);
        if result.is_err() {
            self.continuity = saved;
        }
        result
    }

    fn encode_segment(
        &mut self,
        tracks: &[TrackFragment<'_>],
        observer: &mut dyn PacketObserver,
    ) -> Result<Bytes> {
        let pids = tracks
            .iter()
            .map(|track| self.track_pid(track.stream))
            .collect::<Result<Vec<_>>>()?;

        // Stable sort keeps track order for equal decode times
        let mut order: Vec<(u64, usize, usize)> = tracks
            .iter()
            .enumerate()
            .flat_map(|(t, track)| {
                track
                    .records
                    .iter()
                    .enumerate()
                    .map(move |(r, record)| (record.dts, t, r))
            })
            .collect();
        order.sort_by_key(|&(dts, _, _)| dts);

        let mut out = BytesMut::with_capacity((2 + order.len()) * TS_PACKET_SIZE);
        self.write_tables(&mut out, observer)?;

        for &(_, t, r) in &order {
            let track = &tracks[t];
            let pes = PesPacket::from_record(track.stream, &track.records[r])?.to_bytes()?;
            self.write_pes(&mut out, observer, pids[t], &track.records[r], pes)?;
        }

        log::debug!(
            "assembled segment: {} samples across {} tracks in {} packets",
            order.len(),
            tracks.len(),
            out.len() / TS_PACKET_SIZE
        );
        Ok(out.freeze())
    }

    fn track_pid(&self, stream: &StreamInfo) -> Result<u16> {
        if stream.is_video() {
            Ok(self.config.video_pid)
        } else if self.config.audio_enabled {
            Ok(self.config.audio_pid)
        } else {
            Err(MuxError::InvalidField(
                "audio track given to an assembler without audio enabled".into(),
            ))
        }
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let current = *counter;
        *counter = (current + 1) & 0x0f;
        current
    }

    fn write_tables(&mut self, out: &mut BytesMut, observer: &mut dyn PacketObserver) -> Result<()> {
        let cc = self.next_continuity(PID_PAT);
        let pat = PsiPacket::new(PID_PAT, PatSection::from_config(&self.config), cc).to_bytes()?;
        observer.on_packet(PID_PAT, &pat);
        out.extend_from_slice(&pat);

        let pmt_pid = self.config.pmt_pid;
        let cc = self.next_continuity(pmt_pid);
        let pmt = PsiPacket::new(pmt_pid, PmtSection::from_config(&self.config), cc).to_bytes()?;
        observer.on_packet(pmt_pid, &pmt);
        out.extend_from_slice(&pmt);
        Ok(())
    }

    /// Splits one PES packet across transport packets on `pid`
    fn write_pes(
        &mut self,
        out: &mut BytesMut,
        observer: &mut dyn PacketObserver,
        pid: u16,
        record: &SampleRecord,
        pes: Bytes,
    ) -> Result<()> {
        let mut position = 0;
        while position < pes.len() {
            let first = position == 0;
            let mut field = if first {
                self.opening_field(pid, record)
            } else {
                None
            };

            let capacity = TSPacket::payload_capacity(field.as_ref());
            let remaining = pes.len() - position;
            if remaining < capacity {
                let pad = capacity - remaining;
                field = Some(match field {
                    Some(mut field) => {
                        field.length += pad as u8;
                        field
                    }
                    None => AdaptationField::stuffing((pad - 1) as u8),
                });
            }
            let take = remaining.min(capacity);

            let control = if field.is_some() {
                AFC_ADAPTATION_AND_PAYLOAD
            } else {
                AFC_PAYLOAD_ONLY
            };
            let header = TSHeader::new(pid)
                .with_payload_unit_start(first)
                .with_continuity_counter(self.next_continuity(pid))
                .with_adaptation_field_control(control);
            let packet = TSPacket::new(header, field, pes.slice(position..position + take))
                .to_bytes()?;
            observer.on_packet(pid, &packet);
            out.extend_from_slice(&packet);
            position += take;
        }
        Ok(())
    }

    /// Adaptation field of the first packet of a PES: random access for sync
    /// samples, PCR on the PCR PID
    fn opening_field(&self, pid: u16, record: &SampleRecord) -> Option<AdaptationField> {
        let mut field = None;
        if record.is_iframe {
            field = Some(AdaptationField::default().with_random_access(true));
        }
        if pid == self.config.pcr_pid() {
            if let Some(pcr) = record.pcr {
                field = Some(field.unwrap_or_default().with_pcr(Pcr::from_90khz(pcr)));
            }
        }
        field
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioConfig, CodecType, MediaData, NalUnit};
    use pretty_assertions::assert_eq;

    fn video_stream(payload: usize) -> StreamInfo {
        let mut media = vec![0u8; 4 + payload];
        media[..4].copy_from_slice(&(payload as u32).to_be_bytes());
        media[4] = 0x65;
        StreamInfo::new(CodecType::H264, 90_000).with_media_data(MediaData::new(0, media))
    }

    fn video_record(payload: usize, dts: u64, iframe: bool, pcr: Option<u64>) -> SampleRecord {
        SampleRecord {
            offset: 0,
            size: 4 + payload as u32,
            nal_units: vec![NalUnit {
                offset: 4,
                size: payload as u32,
            }],
            is_iframe: iframe,
            dts,
            cts: dts,
            pcr,
        }
    }

    fn packets(segment: &[u8]) -> Vec<&[u8]> {
        segment.chunks(TS_PACKET_SIZE).collect()
    }

    fn pid(packet: &[u8]) -> u16 {
        ((packet[1] as u16 & 0x1f) << 8) | packet[2] as u16
    }

    #[test]
    fn test_single_packet_sample() {
        let stream = video_stream(20);
        let records = [video_record(20, 0, true, Some(0))];
        let mut assembler = SegmentAssembler::new(TsConfig::default());
        let segment = assembler
            .assemble(&[TrackFragment::new(&stream, &records)])
            .unwrap();

        let packets = packets(&segment);
        assert_eq!(segment.len(), 3 * TS_PACKET_SIZE);
        assert_eq!(pid(packets[0]), PID_PAT);
        assert_eq!(pid(packets[1]), PID_PMT);

        let video = packets[2];
        assert_eq!(&video[..4], &[0x47, 0x41, 0x00, 0x30]);
        // Random access and PCR, then stuffing up to the PES
        assert_eq!(video[5], 0x50);
        let pes_len = 14 + 6 + 4 + 20;
        assert_eq!(video[4] as usize, 183 - pes_len);
        assert_eq!(&video[188 - pes_len..188 - pes_len + 4], &[0x00, 0x00, 0x01, 0xE0]);
    }

    #[test]
    fn test_multi_packet_sample() {
        let stream = video_stream(400);
        let records = [video_record(400, 0, false, None)];
        let mut assembler = SegmentAssembler::new(TsConfig::default());
        let segment = assembler
            .assemble(&[TrackFragment::new(&stream, &records)])
            .unwrap();

        let packets = packets(&segment);
        // PES of 14 + 6 + 4 + 400 = 424 bytes: 184 + 184 + 56
        assert_eq!(packets.len(), 5);
        assert_eq!(packets[2][1] & 0x40, 0x40);
        assert_eq!(packets[2][3], 0x10);
        assert_eq!(packets[3][1] & 0x40, 0);
        assert_eq!(packets[3][3], 0x11);
        // Last packet stuffed through its adaptation field
        assert_eq!(packets[4][3], 0x32);
        assert_eq!(packets[4][4] as usize, 183 - 56);
        assert_eq!(packets[4][5], 0x00);
    }

    #[test]
    fn test_single_byte_stuffing() {
        // 183 bytes of PES leave exactly one byte to stuff
        let stream = video_stream(159);
        let records = [video_record(159, 0, false, None)];
        let segment = SegmentAssembler::new(TsConfig::default())
            .assemble(&[TrackFragment::new(&stream, &records)])
            .unwrap();
        let video = packets(&segment)[2];
        assert_eq!(video[3], 0x30);
        assert_eq!(video[4], 0x00);
        assert_eq!(&video[5..9], &[0x00, 0x00, 0x01, 0xE0]);
    }

    #[test]
    fn test_continuity_persists_across_segments() {
        let stream = video_stream(20);
        let records = [video_record(20, 0, false, None)];
        let mut assembler = SegmentAssembler::new(TsConfig::default());
        for _ in 0..17 {
            assembler
                .assemble(&[TrackFragment::new(&stream, &records)])
                .unwrap();
        }
        let segment = assembler
            .assemble(&[TrackFragment::new(&stream, &records)])
            .unwrap();
        // 18th segment: counter 17 mod 16
        for packet in packets(&segment) {
            assert_eq!(packet[3] & 0x0f, 1);
        }
        assembler.reset();
        let segment = assembler
            .assemble(&[TrackFragment::new(&stream, &records)])
            .unwrap();
        assert_eq!(segment[3] & 0x0f, 0);
    }

    #[test]
    fn test_interleaves_by_dts() {
        let video = video_stream(20);
        let video_records = [
            video_record(20, 0, true, Some(0)),
            video_record(20, 3000, false, None),
        ];
        let audio = StreamInfo::new(CodecType::AAC, 90_000)
            .with_media_data(MediaData::new(0, vec![0x21; 16]))
            .with_audio_config(AudioConfig {
                object_type: 2,
                sampling_frequency_index: 3,
                channel_configuration: 2,
            });
        let audio_records = [
            SampleRecord { size: 8, dts: 0, cts: 0, ..Default::default() },
            SampleRecord { offset: 8, size: 8, dts: 1920, cts: 1920, ..Default::default() },
        ];

        let mut observer = HexDumpObserver::new();
        let segment = SegmentAssembler::new(TsConfig::default().with_audio(true))
            .assemble_with(
                &[
                    TrackFragment::new(&video, &video_records),
                    TrackFragment::new(&audio, &audio_records),
                ],
                &mut observer,
            )
            .unwrap();

        let pids: Vec<u16> = packets(&segment).into_iter().map(pid).collect();
        assert_eq!(
            pids,
            vec![PID_PAT, PID_PMT, PID_VIDEO, PID_AUDIO, PID_AUDIO, PID_VIDEO]
        );
        assert_eq!(observer.packets(), 6);
    }

    #[test]
    fn test_audio_track_needs_audio_enabled() {
        let audio = StreamInfo::new(CodecType::AAC, 48_000);
        let mut assembler = SegmentAssembler::new(TsConfig::default());
        assert!(matches!(
            assembler.assemble(&[TrackFragment::new(&audio, &[])]),
            Err(MuxError::InvalidField(_))
        ));
    }

    #[test]
    fn test_failed_segment_keeps_counters() {
        let stream = video_stream(20);
        let good = [video_record(20, 0, false, None)];
        let bad = [video_record(200, 0, false, None)];
        let mut assembler = SegmentAssembler::new(TsConfig::default());
        assert!(assembler
            .assemble(&[TrackFragment::new(&stream, &bad)])
            .is_err());
        let segment = assembler
            .assemble(&[TrackFragment::new(&stream, &good)])
            .unwrap();
        assert_eq!(segment[3] & 0x0f, 0);
    }

    #[test]
    fn test_hex_dump() {
        let data: Vec<u8> = (0..18).collect();
        assert_eq!(
            hex_dump(&data),
            "0000: 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f\n0010: 10 11"
        );
    }
}
