use super::emitter::PeriodicEmitter;
use super::types::TIMESTAMP_MAX;
use crate::av::{FragmentInfo, NalUnit, SampleRecord, StreamInfo};
use crate::config::TsConfig;
use crate::error::{MuxError, Result, Table};

/// Turns a fragment of a stream into per-sample records: byte layout, NAL
/// units, sync flags, DTS/CTS and PCR, all on the 90 kHz clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleTiming {
    /// Samples skipped between two PCRs
    pub pcr_interval: u32,
}

impl SampleTiming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timing with the PCR interval of `config`
    pub fn from_config(config: &TsConfig) -> Self {
        Self::new().with_pcr_interval(config.pcr_interval)
    }

    pub fn with_pcr_interval(mut self, interval: u32) -> Self {
        self.pcr_interval = interval;
        self
    }

    /// Builds the records of every sample in `fragment`, in sample order.
    ///
    /// Nothing is returned on error; a fragment is never half-described.
    pub fn records(&self, stream: &StreamInfo, fragment: &FragmentInfo) -> Result<Vec<SampleRecord>> {
        if fragment.sample_count == 0 {
            return Ok(Vec::new());
        }

        let mut records = Self::layout(stream, fragment)?;
        if stream.is_video() {
            for record in records.iter_mut() {
                record.nal_units = Self::nal_units(stream, record)?;
            }
            Self::mark_iframes(stream, fragment, &mut records);
        }
        Self::timestamps(stream, fragment, &mut records)?;
        self.pcrs(stream, fragment, &mut records)?;

        for record in records.iter_mut() {
            record.dts = scale_clock(record.dts, stream.clock_scale)?;
            record.cts = scale_clock(record.cts, stream.clock_scale)?;
            if let Some(pcr) = record.pcr {
                record.pcr = Some(scale_clock(pcr, stream.clock_scale)?);
            }
        }

        log::debug!(
            "timed {} samples from {} (base dts {}, scale {})",
            records.len(),
            fragment.sample_start,
            fragment.base_dts,
            stream.clock_scale
        );
        Ok(records)
    }

    fn layout(stream: &StreamInfo, fragment: &FragmentInfo) -> Result<Vec<SampleRecord>> {
        let mut offset = fragment.data_offset.unwrap_or(stream.media_data.offset);
        let mut records = Vec::with_capacity(fragment.sample_count as usize);
        for i in 0..fragment.sample_count as u64 {
            let size = stream.sample_sizes.size(fragment.sample_start as u64 + i)?;
            records.push(SampleRecord {
                offset,
                size,
                ..Default::default()
            });
            offset += size as u64;
        }
        Ok(records)
    }

    fn nal_units(stream: &StreamInfo, record: &SampleRecord) -> Result<Vec<NalUnit>> {
        let width = stream.nal_length_size;
        if !(1..=4).contains(&width) {
            return Err(MuxError::MalformedInput(format!(
                "NAL length prefix of {} bytes",
                width
            )));
        }

        let media = &stream.media_data;
        let media_end = media.offset + media.data.len() as u64;
        let sample_end = record.offset + record.size as u64;
        let mut position = record.offset;
        let mut units = Vec::new();

        while position < sample_end {
            if position + width as u64 > sample_end {
                return Err(MuxError::MalformedInput(format!(
                    "NAL length prefix at {} crosses sample end {}",
                    position, sample_end
                )));
            }
            let size = media.read_be(position, width)?;
            let offset = position + width as u64;
            let end = offset + size as u64;
            if end > sample_end {
                return Err(MuxError::MalformedInput(format!(
                    "NAL of {} bytes at {} overruns sample end {}",
                    size, offset, sample_end
                )));
            }
            if end > media_end {
                return Err(MuxError::TableExhausted {
                    table: Table::MediaData,
                    needed: (end - media.offset) as usize,
                    available: media.data.len(),
                });
            }
            units.push(NalUnit { offset, size });
            position = end;
        }
        log::trace!("sample at {}: {} NAL units", record.offset, units.len());
        Ok(units)
    }

    fn mark_iframes(stream: &StreamInfo, fragment: &FragmentInfo, records: &mut [SampleRecord]) {
        for &index in &stream.sync_samples {
            if fragment.contains(index) {
                records[(index - fragment.sample_start) as usize].is_iframe = true;
            }
        }
    }

    fn timestamps(stream: &StreamInfo, fragment: &FragmentInfo, records: &mut [SampleRecord]) -> Result<()> {
        let mut deltas = fragment.time_to_sample;
        let mut offsets = fragment.composition_offset;
        let mut dts = fragment.base_dts;

        for (i, record) in records.iter_mut().enumerate() {
            let sample = fragment.sample_start as u64 + i as u64;
            let delta = deltas
                .current(&stream.time_to_sample, Table::TimeToSample, sample)?
                .sample_delta;
            deltas.advance();

            record.dts = dts;
            record.cts = match &stream.composition_offsets {
                Some(table) => {
                    let offset = offsets
                        .current(table, Table::CompositionOffset, sample)?
                        .sample_offset;
                    offsets.advance();
                    dts.checked_add_signed(offset as i64).ok_or_else(|| {
                        MuxError::MalformedInput(format!(
                            "composition offset {} moves sample {} before zero",
                            offset, sample
                        ))
                    })?
                }
                None => dts,
            };

            dts = dts.checked_add(delta as u64).ok_or_else(|| {
                MuxError::MalformedInput(format!("DTS overflow after sample {}", sample))
            })?;
        }
        Ok(())
    }

    fn pcrs(&self, stream: &StreamInfo, fragment: &FragmentInfo, records: &mut [SampleRecord]) -> Result<()> {
        let mut emitter = PeriodicEmitter::new(self.pcr_interval);
        for (i, record) in records.iter_mut().enumerate() {
            if emitter.should_emit() {
                let sample = fragment.sample_start as u64 + i as u64;
                let pcr = sample.checked_mul(stream.sample_delta as u64).ok_or_else(|| {
                    MuxError::MalformedInput(format!("PCR overflow at sample {}", sample))
                })?;
                record.pcr = Some(pcr);
                emitter.reset();
            }
        }
        Ok(())
    }
}

/// Converts container ticks to 90 kHz ticks, truncating.
///
/// Results that are negative, non-finite or wider than 33 bits are rejected.
pub fn scale_clock(value: u64, scale: f64) -> Result<u64> {
    let scaled = (value as f64 * scale).trunc();
    if !scaled.is_finite() || scaled < 0.0 || scaled > TIMESTAMP_MAX as f64 {
        return Err(MuxError::TimestampOverflow { value, scale });
    }
    Ok(scaled as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{
        CodecType, CompositionOffsetEntry, MediaData, SampleSizes, TableCursor, TimeToSampleEntry,
    };
    use pretty_assertions::assert_eq;

    fn tts(entries: &[(u32, u32)]) -> Vec<TimeToSampleEntry> {
        entries
            .iter()
            .map(|&(sample_count, sample_delta)| TimeToSampleEntry {
                sample_count,
                sample_delta,
            })
            .collect()
    }

    fn audio(count: usize, entries: &[(u32, u32)]) -> StreamInfo {
        StreamInfo::new(CodecType::AAC, 90_000)
            .with_sample_sizes(SampleSizes::PerSample(vec![4; count]))
            .with_time_to_sample(tts(entries))
            .with_media_data(MediaData::new(0, vec![0; count * 4]))
    }

    #[test]
    fn test_dts_from_run_lengths() {
        let stream = audio(5, &[(3, 100), (2, 200)]);
        let records = SampleTiming::new()
            .records(&stream, &FragmentInfo::new(0, 5, 0))
            .unwrap();
        let dts: Vec<u64> = records.iter().map(|r| r.dts).collect();
        assert_eq!(dts, vec![0, 100, 200, 300, 500]);
        let cts: Vec<u64> = records.iter().map(|r| r.cts).collect();
        assert_eq!(cts, dts);
        let offsets: Vec<u64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 12, 16]);
    }

    #[test]
    fn test_composition_offsets() {
        let stream = audio(4, &[(4, 10)]).with_composition_offsets(vec![
            CompositionOffsetEntry { sample_count: 2, sample_offset: 20 },
            CompositionOffsetEntry { sample_count: 2, sample_offset: -5 },
        ]);
        let records = SampleTiming::new()
            .records(&stream, &FragmentInfo::new(0, 4, 0))
            .unwrap();
        let cts: Vec<u64> = records.iter().map(|r| r.cts).collect();
        assert_eq!(cts, vec![20, 30, 15, 25]);
    }

    #[test]
    fn test_negative_cts_is_malformed() {
        let stream = audio(1, &[(1, 10)]).with_composition_offsets(vec![CompositionOffsetEntry {
            sample_count: 1,
            sample_offset: -1,
        }]);
        assert!(matches!(
            SampleTiming::new().records(&stream, &FragmentInfo::new(0, 1, 0)),
            Err(MuxError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_short_tables_are_named() {
        let stream = audio(5, &[(3, 100)]);
        assert!(matches!(
            SampleTiming::new().records(&stream, &FragmentInfo::new(0, 5, 0)),
            Err(MuxError::TableExhausted { table: Table::TimeToSample, needed: 4, available: 3 })
        ));

        let stream = audio(5, &[(5, 100)])
            .with_composition_offsets(vec![CompositionOffsetEntry { sample_count: 2, sample_offset: 0 }]);
        assert!(matches!(
            SampleTiming::new().records(&stream, &FragmentInfo::new(0, 5, 0)),
            Err(MuxError::TableExhausted { table: Table::CompositionOffset, .. })
        ));

        let stream = audio(2, &[(5, 100)]);
        assert!(matches!(
            SampleTiming::new().records(&stream, &FragmentInfo::new(0, 3, 0)),
            Err(MuxError::TableExhausted { table: Table::SampleSize, .. })
        ));
    }

    #[test]
    fn test_empty_fragment() {
        let stream = audio(0, &[]);
        let records = SampleTiming::new()
            .records(&stream, &FragmentInfo::new(0, 0, 0))
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_pcr_every_sample() {
        // 30 fps at a 90 kHz timescale, 200 samples
        let stream = StreamInfo::new(CodecType::AAC, 90_000)
            .with_sample_sizes(SampleSizes::Uniform(1))
            .with_time_to_sample(tts(&[(200, 3000)]))
            .with_media_data(MediaData::new(0, vec![0; 200]))
            .with_clock_scale(0.5);
        let fragment = FragmentInfo {
            sample_start: 96,
            sample_count: 10,
            base_dts: 96 * 3000,
            time_to_sample: TableCursor { entry: 0, consumed: 96 },
            ..Default::default()
        };
        let records = SampleTiming::new().records(&stream, &fragment).unwrap();
        assert!(records.iter().all(SampleRecord::has_pcr));
        assert_eq!(records[4].pcr, Some((100.0 * 3000.0 * 0.5) as u64));
        assert_eq!(records[4].dts, 150_000);
    }

    #[test]
    fn test_pcr_interval() {
        let stream = audio(6, &[(6, 10)]);
        let records = SampleTiming::from_config(&TsConfig::default().with_pcr_interval(2))
            .records(&stream, &FragmentInfo::new(0, 6, 0))
            .unwrap();
        let pcrs: Vec<Option<u64>> = records.iter().map(|r| r.pcr).collect();
        assert_eq!(pcrs, vec![Some(0), None, None, Some(30), None, None]);
    }

    fn video(payload: Vec<u8>, sizes: Vec<u32>) -> StreamInfo {
        let count = sizes.len() as u32;
        StreamInfo::new(CodecType::H264, 90_000)
            .with_sample_sizes(SampleSizes::PerSample(sizes))
            .with_time_to_sample(tts(&[(count, 3000)]))
            .with_media_data(MediaData::new(0, payload))
    }

    #[test]
    fn test_nal_units() {
        let payload = vec![
            0, 0, 0, 2, 0x65, 0xAA, // IDR slice
            0, 0, 0, 1, 0x06, // SEI
            0, 0, 0, 3, 0x41, 0x01, 0x02,
        ];
        let stream = video(payload, vec![11, 7]).with_sync_samples(vec![0]);
        let records = SampleTiming::new()
            .records(&stream, &FragmentInfo::new(0, 2, 0))
            .unwrap();
        assert_eq!(
            records[0].nal_units,
            vec![NalUnit { offset: 4, size: 2 }, NalUnit { offset: 10, size: 1 }]
        );
        assert_eq!(records[1].nal_units, vec![NalUnit { offset: 15, size: 3 }]);
        assert!(records[0].is_iframe);
        assert!(!records[1].is_iframe);
    }

    #[test]
    fn test_short_nal_prefix() {
        let payload = vec![0, 2, 0x65, 0xAA, 0, 1, 0x41];
        let stream = video(payload, vec![7]).with_nal_length_size(2);
        let records = SampleTiming::new()
            .records(&stream, &FragmentInfo::new(0, 1, 0))
            .unwrap();
        assert_eq!(
            records[0].nal_units,
            vec![NalUnit { offset: 2, size: 2 }, NalUnit { offset: 6, size: 1 }]
        );
    }

    #[test]
    fn test_nal_overrun() {
        let stream = video(vec![0, 0, 0, 9, 0x65, 0xAA], vec![6]);
        assert!(matches!(
            SampleTiming::new().records(&stream, &FragmentInfo::new(0, 1, 0)),
            Err(MuxError::MalformedInput(_))
        ));

        // Sample claims bytes the media data does not hold
        let stream = video(vec![0, 0, 0, 2, 0x65], vec![6]);
        assert!(matches!(
            SampleTiming::new().records(&stream, &FragmentInfo::new(0, 1, 0)),
            Err(MuxError::TableExhausted { table: Table::MediaData, .. })
        ));

        let stream = video(vec![0, 0, 0, 0], vec![4]).with_nal_length_size(3);
        let records = SampleTiming::new()
            .records(&stream, &FragmentInfo::new(0, 1, 0));
        assert!(matches!(records, Err(MuxError::MalformedInput(_))));
    }

    #[test]
    fn test_iframes_inside_fragment() {
        let stream = video(vec![0; 90 * 4], vec![4; 90]).with_sync_samples(vec![0, 30, 60]);
        let fragment = stream.fragment(30, 30).unwrap();
        let records = SampleTiming::new().records(&stream, &fragment).unwrap();
        let flagged: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_iframe)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![0]);
    }

    #[test]
    fn test_scale_clock() {
        assert_eq!(scale_clock(1_001, 1.5).unwrap(), 1_501);
        assert_eq!(scale_clock(TIMESTAMP_MAX, 1.0).unwrap(), TIMESTAMP_MAX);
        assert!(matches!(
            scale_clock(TIMESTAMP_MAX, 2.0),
            Err(MuxError::TimestampOverflow { .. })
        ));
        assert!(scale_clock(1, -1.0).is_err());
        assert!(scale_clock(1, f64::NAN).is_err());
        assert!(scale_clock(1, f64::INFINITY).is_err());
    }
}
