use super::CodecType;
use crate::error::{MuxError, Result, Table};
use crate::format::ts::types::PTS_HZ;
use crate::utils::BitReader;
use bytes::Bytes;
use std::time::Duration;

/// One run of the time-to-sample table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// One run of the composition-offset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionOffsetEntry {
    pub sample_count: u32,
    /// CTS minus DTS, signed for version 1 tables
    pub sample_offset: i32,
}

/// Entries of a run-length encoded per-sample table.
pub trait RunLength {
    /// Consecutive samples sharing this entry
    fn sample_count(&self) -> u32;
}

impl RunLength for TimeToSampleEntry {
    fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

impl RunLength for CompositionOffsetEntry {
    fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

fn samples_described<T: RunLength>(table: &[T]) -> u64 {
    table.iter().map(|e| e.sample_count() as u64).sum()
}

/// Position inside a run-length table: the active entry and how many of its
/// samples precede the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCursor {
    pub entry: usize,
    pub consumed: u32,
}

impl TableCursor {
    /// Cursor positioned on global sample `index`
    pub fn seek<T: RunLength>(table: &[T], kind: Table, index: u64) -> Result<Self> {
        let mut remaining = index;
        for (entry, run) in table.iter().enumerate() {
            let count = run.sample_count() as u64;
            if remaining < count {
                return Ok(Self {
                    entry,
                    consumed: remaining as u32,
                });
            }
            remaining -= count;
        }
        if remaining == 0 {
            return Ok(Self {
                entry: table.len(),
                consumed: 0,
            });
        }
        Err(MuxError::TableExhausted {
            table: kind,
            needed: index as usize,
            available: samples_described(table) as usize,
        })
    }

    /// Entry covering the sample under the cursor.
    ///
    /// Exhausted runs are skipped; running off the end of the table means it
    /// describes fewer samples than the fragment holds.
    pub fn current<'a, T: RunLength>(
        &mut self,
        table: &'a [T],
        kind: Table,
        sample: u64,
    ) -> Result<&'a T> {
        while let Some(run) = table.get(self.entry) {
            if self.consumed < run.sample_count() {
                return Ok(run);
            }
            self.entry += 1;
            self.consumed = 0;
        }
        Err(MuxError::TableExhausted {
            table: kind,
            needed: sample as usize + 1,
            available: samples_described(table) as usize,
        })
    }

    /// Moves past one sample
    pub fn advance(&mut self) {
        self.consumed += 1;
    }
}

/// Sample sizes: one size for every sample, or a per-sample table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    Uniform(u32),
    PerSample(Vec<u32>),
}

impl SampleSizes {
    /// Size of global sample `index`
    pub fn size(&self, index: u64) -> Result<u32> {
        match self {
            SampleSizes::Uniform(size) => Ok(*size),
            SampleSizes::PerSample(sizes) => {
                sizes
                    .get(index as usize)
                    .copied()
                    .ok_or(MuxError::TableExhausted {
                        table: Table::SampleSize,
                        needed: index as usize + 1,
                        available: sizes.len(),
                    })
            }
        }
    }
}

/// The raw media data region, addressed by absolute offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaData {
    /// Absolute offset of `data[0]`
    pub offset: u64,
    pub data: Bytes,
}

impl MediaData {
    pub fn new(offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    /// `len` bytes starting at absolute `offset`
    pub fn slice(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = offset.checked_sub(self.offset).ok_or_else(|| {
            MuxError::MalformedInput(format!(
                "offset {} precedes media data at {}",
                offset, self.offset
            ))
        })? as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(MuxError::TableExhausted {
                table: Table::MediaData,
                needed: end,
                available: self.data.len(),
            });
        }
        Ok(self.data.slice(start..end))
    }

    /// Big-endian unsigned integer of `width` bytes at absolute `offset`
    pub fn read_be(&self, offset: u64, width: u8) -> Result<u32> {
        let bytes = self.slice(offset, width as usize)?;
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }
}

/// AAC decoder configuration, as carried by an AudioSpecificConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// MPEG-4 audio object type (2 = AAC LC)
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioConfig {
    /// Parses the leading fields of an AudioSpecificConfig
    pub fn from_audio_specific_config(data: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(data);
        let object_type = reader
            .read_bits(5)
            .map_err(|_| MuxError::MalformedInput("AudioSpecificConfig too short".into()))?
            as u8;
        let sampling_frequency_index = reader
            .read_bits(4)
            .map_err(|_| MuxError::MalformedInput("AudioSpecificConfig too short".into()))?
            as u8;
        if sampling_frequency_index == 0x0f {
            return Err(MuxError::MalformedInput(
                "explicit AAC sampling frequency not supported".into(),
            ));
        }
        let channel_configuration = reader
            .read_bits(4)
            .map_err(|_| MuxError::MalformedInput("AudioSpecificConfig too short".into()))?
            as u8;
        Ok(Self {
            object_type,
            sampling_frequency_index,
            channel_configuration,
        })
    }
}

/// Stream-level tables decoded from the container.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub codec: CodecType,
    /// Ticks per second of the container timestamps
    pub timescale: u32,
    pub sample_sizes: SampleSizes,
    pub time_to_sample: Vec<TimeToSampleEntry>,
    /// Present when the stream has composition offsets
    pub composition_offsets: Option<Vec<CompositionOffsetEntry>>,
    pub media_data: MediaData,
    /// Width of the NAL length prefix, 1 to 4 bytes
    pub nal_length_size: u8,
    /// Zero-based indices of sync samples
    pub sync_samples: Vec<u32>,
    /// Nominal sample duration, in container ticks
    pub sample_delta: u32,
    /// Converts container ticks to 90 kHz ticks
    pub clock_scale: f64,
    pub audio_config: Option<AudioConfig>,
}

impl StreamInfo {
    /// Empty stream with a clock scale derived from `timescale`
    pub fn new(codec: CodecType, timescale: u32) -> Self {
        Self {
            codec,
            timescale,
            sample_sizes: SampleSizes::PerSample(Vec::new()),
            time_to_sample: Vec::new(),
            composition_offsets: None,
            media_data: MediaData::default(),
            nal_length_size: 4,
            sync_samples: Vec::new(),
            sample_delta: 0,
            clock_scale: PTS_HZ as f64 / timescale as f64,
            audio_config: None,
        }
    }

    pub fn with_sample_sizes(mut self, sizes: SampleSizes) -> Self {
        self.sample_sizes = sizes;
        self
    }

    /// Sets the time-to-sample table; the first delta becomes the nominal
    /// sample delta unless one was already set
    pub fn with_time_to_sample(mut self, entries: Vec<TimeToSampleEntry>) -> Self {
        if self.sample_delta == 0 {
            self.sample_delta = entries.first().map_or(0, |e| e.sample_delta);
        }
        self.time_to_sample = entries;
        self
    }

    pub fn with_composition_offsets(mut self, entries: Vec<CompositionOffsetEntry>) -> Self {
        self.composition_offsets = Some(entries);
        self
    }

    pub fn with_media_data(mut self, media_data: MediaData) -> Self {
        self.media_data = media_data;
        self
    }

    pub fn with_nal_length_size(mut self, size: u8) -> Self {
        self.nal_length_size = size;
        self
    }

    pub fn with_sync_samples(mut self, indices: Vec<u32>) -> Self {
        self.sync_samples = indices;
        self
    }

    pub fn with_sample_delta(mut self, delta: u32) -> Self {
        self.sample_delta = delta;
        self
    }

    pub fn with_clock_scale(mut self, scale: f64) -> Self {
        self.clock_scale = scale;
        self
    }

    pub fn with_audio_config(mut self, config: AudioConfig) -> Self {
        self.audio_config = Some(config);
        self
    }

    pub fn is_video(&self) -> bool {
        self.codec.is_video()
    }

    /// Samples in the stream
    pub fn sample_count(&self) -> u64 {
        match &self.sample_sizes {
            SampleSizes::PerSample(sizes) => sizes.len() as u64,
            SampleSizes::Uniform(_) => samples_described(&self.time_to_sample),
        }
    }

    /// Descriptor of the fragment covering samples `[start, start + count)`.
    ///
    /// The base DTS, table cursors and data offset are found by walking the
    /// tables from the first sample.
    pub fn fragment(&self, start: u32, count: u32) -> Result<FragmentInfo> {
        let end = start as u64 + count as u64;
        if end > self.sample_count() {
            return Err(MuxError::TableExhausted {
                table: Table::SampleSize,
                needed: end as usize,
                available: self.sample_count() as usize,
            });
        }

        let mut walker = SampleWalker::new(self);
        while walker.index < start {
            walker.step()?;
        }
        Ok(walker.snapshot(count))
    }

    /// Splits the stream into fragments of at least `target` duration.
    ///
    /// Video fragments start on sync samples; a stream without a sync sample
    /// list, or an audio stream, is split on duration alone.
    pub fn plan_fragments(&self, target: Duration) -> Result<Vec<FragmentInfo>> {
        let total = self.sample_count();
        if total > u32::MAX as u64 {
            return Err(MuxError::MalformedInput(format!("{} samples in one stream", total)));
        }
        let total = total as u32;
        let target_ticks = (target.as_secs_f64() * self.timescale as f64) as u64;

        let mut fragments = Vec::new();
        let mut walker = SampleWalker::new(self);
        let mut current = walker.snapshot(0);
        let mut elapsed = 0u64;

        while walker.index < total {
            if walker.index > current.sample_start
                && elapsed >= target_ticks
                && self.is_split_point(walker.index)
            {
                current.sample_count = walker.index - current.sample_start;
                fragments.push(current);
                current = walker.snapshot(0);
                elapsed = 0;
            }
            elapsed += walker.step()? as u64;
        }

        if total > current.sample_start {
            current.sample_count = total - current.sample_start;
            fragments.push(current);
        }
        log::debug!(
            "planned {} fragments over {} samples (target {:?})",
            fragments.len(),
            total,
            target
        );
        Ok(fragments)
    }

    fn is_split_point(&self, index: u32) -> bool {
        !self.is_video() || self.sync_samples.is_empty() || self.sync_samples.contains(&index)
    }
}

/// Walks a stream sample by sample, tracking DTS, data offset and table
/// cursors.
struct SampleWalker<'a> {
    stream: &'a StreamInfo,
    index: u32,
    dts: u64,
    offset: u64,
    time_to_sample: TableCursor,
    composition_offset: TableCursor,
}

impl<'a> SampleWalker<'a> {
    fn new(stream: &'a StreamInfo) -> Self {
        Self {
            stream,
            index: 0,
            dts: 0,
            offset: stream.media_data.offset,
            time_to_sample: TableCursor::default(),
            composition_offset: TableCursor::default(),
        }
    }

    fn snapshot(&self, count: u32) -> FragmentInfo {
        FragmentInfo {
            sample_start: self.index,
            sample_count: count,
            base_dts: self.dts,
            time_to_sample: self.time_to_sample,
            composition_offset: self.composition_offset,
            data_offset: Some(self.offset),
        }
    }

    /// Moves past the current sample and returns its duration
    fn step(&mut self) -> Result<u32> {
        let sample = self.index as u64;
        let delta = self
            .time_to_sample
            .current(&self.stream.time_to_sample, Table::TimeToSample, sample)?
            .sample_delta;
        self.time_to_sample.advance();

        if let Some(offsets) = &self.stream.composition_offsets {
            self.composition_offset
                .current(offsets, Table::CompositionOffset, sample)?;
            self.composition_offset.advance();
        }

        self.offset += self.stream.sample_sizes.size(sample)? as u64;
        self.dts = self.dts.checked_add(delta as u64).ok_or_else(|| {
            MuxError::MalformedInput(format!("DTS overflow at sample {}", sample))
        })?;
        self.index += 1;
        Ok(delta)
    }
}

/// The slice of a stream encoded into one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Global index of the first sample
    pub sample_start: u32,
    pub sample_count: u32,
    /// DTS of the first sample, in container ticks
    pub base_dts: u64,
    /// Time-to-sample position of the first sample
    pub time_to_sample: TableCursor,
    /// Composition-offset position of the first sample
    pub composition_offset: TableCursor,
    /// Absolute offset of the first sample; the media data base when unset
    pub data_offset: Option<u64>,
}

impl FragmentInfo {
    /// Fragment starting at the beginning of every table
    pub fn new(sample_start: u32, sample_count: u32, base_dts: u64) -> Self {
        Self {
            sample_start,
            sample_count,
            base_dts,
            ..Default::default()
        }
    }

    /// True when global sample `index` belongs to this fragment
    pub fn contains(&self, index: u32) -> bool {
        index >= self.sample_start && (index as u64) < self.sample_start as u64 + self.sample_count as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_cursor_seek() {
        let table = tts(&[(3, 100), (2, 200)]);
        assert_eq!(
            TableCursor::seek(&table, Table::TimeToSample, 0).unwrap(),
            TableCursor { entry: 0, consumed: 0 }
        );
        assert_eq!(
            TableCursor::seek(&table, Table::TimeToSample, 4).unwrap(),
            TableCursor { entry: 1, consumed: 1 }
        );
        assert_eq!(
            TableCursor::seek(&table, Table::TimeToSample, 5).unwrap(),
            TableCursor { entry: 2, consumed: 0 }
        );
        assert!(matches!(
            TableCursor::seek(&table, Table::TimeToSample, 6),
            Err(MuxError::TableExhausted { table: Table::TimeToSample, available: 5, .. })
        ));
    }

    #[test]
    fn test_cursor_skips_empty_runs() {
        let table = tts(&[(1, 10), (0, 99), (1, 20)]);
        let mut cursor = TableCursor::default();
        assert_eq!(cursor.current(&table, Table::TimeToSample, 0).unwrap().sample_delta, 10);
        cursor.advance();
        assert_eq!(cursor.current(&table, Table::TimeToSample, 1).unwrap().sample_delta, 20);
        cursor.advance();
        assert!(cursor.current(&table, Table::TimeToSample, 2).is_err());
    }

    #[test]
    fn test_sample_sizes() {
        assert_eq!(SampleSizes::Uniform(12).size(1_000).unwrap(), 12);
        let sizes = SampleSizes::PerSample(vec![1, 2]);
        assert_eq!(sizes.size(1).unwrap(), 2);
        assert!(matches!(
            sizes.size(2),
            Err(MuxError::TableExhausted { table: Table::SampleSize, needed: 3, available: 2 })
        ));
    }

    #[test]
    fn test_media_data_reads() {
        let media = MediaData::new(100, vec![0x00, 0x00, 0x01, 0x02, 0xAA]);
        assert_eq!(media.read_be(100, 4).unwrap(), 0x0102);
        assert_eq!(media.read_be(103, 2).unwrap(), 0x02AA);
        assert_eq!(&media.slice(104, 1).unwrap()[..], &[0xAA]);
        assert!(matches!(
            media.slice(104, 2),
            Err(MuxError::TableExhausted { table: Table::MediaData, .. })
        ));
        assert!(matches!(media.slice(99, 1), Err(MuxError::MalformedInput(_))));
    }

    #[test]
    fn test_audio_specific_config() {
        // AAC LC, 44.1 kHz, stereo
        let config = AudioConfig::from_audio_specific_config(&[0x12, 0x10]).unwrap();
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.channel_configuration, 2);
        assert!(AudioConfig::from_audio_specific_config(&[0x12]).is_err());
    }

    #[test]
    fn test_fragment_locator() {
        let stream = StreamInfo::new(CodecType::H264, 90_000)
            .with_sample_sizes(SampleSizes::PerSample(vec![10, 20, 30, 40, 50]))
            .with_time_to_sample(tts(&[(3, 100), (2, 200)]))
            .with_composition_offsets(vec![
                CompositionOffsetEntry { sample_count: 4, sample_offset: 0 },
                CompositionOffsetEntry { sample_count: 1, sample_offset: 50 },
            ])
            .with_media_data(MediaData::new(1_000, vec![0; 150]));
        assert_eq!(stream.sample_delta, 100);

        let fragment = stream.fragment(3, 2).unwrap();
        assert_eq!(fragment.sample_start, 3);
        assert_eq!(fragment.base_dts, 300);
        // Exhausted runs are only skipped on the next lookup
        assert_eq!(fragment.time_to_sample, TableCursor { entry: 0, consumed: 3 });
        assert_eq!(fragment.composition_offset, TableCursor { entry: 0, consumed: 3 });
        assert_eq!(fragment.data_offset, Some(1_060));
        assert!(fragment.contains(4));
        assert!(!fragment.contains(5));

        assert!(matches!(
            stream.fragment(4, 2),
            Err(MuxError::TableExhausted { table: Table::SampleSize, needed: 6, available: 5 })
        ));
    }

    #[test]
    fn test_plan_fragments_on_sync_samples() {
        // 10 samples of one second each, sync every 3 samples
        let stream = StreamInfo::new(CodecType::H264, 1_000)
            .with_sample_sizes(SampleSizes::Uniform(8))
            .with_time_to_sample(tts(&[(10, 1_000)]))
            .with_sync_samples(vec![0, 3, 6, 9]);

        let fragments = stream.plan_fragments(Duration::from_secs(2)).unwrap();
        let layout: Vec<(u32, u32)> = fragments
            .iter()
            .map(|f| (f.sample_start, f.sample_count))
            .collect();
        assert_eq!(layout, vec![(0, 3), (3, 3), (6, 3), (9, 1)]);
        assert_eq!(fragments[1].base_dts, 3_000);
        assert_eq!(fragments[1].data_offset, Some(24));
    }

    #[test]
    fn test_plan_fragments_audio_by_duration() {
        let stream = StreamInfo::new(CodecType::AAC, 44_100)
            .with_sample_sizes(SampleSizes::Uniform(4))
            .with_time_to_sample(tts(&[(100, 1_024)]));

        let fragments = stream.plan_fragments(Duration::from_secs(1)).unwrap();
        // ceil(44100 / 1024) = 44 samples reach one second
        assert_eq!(fragments[0].sample_count, 44);
        let covered: u32 = fragments.iter().map(|f| f.sample_count).sum();
        assert_eq!(covered, 100);
    }
}
