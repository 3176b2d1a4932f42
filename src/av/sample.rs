/// A NAL unit inside a sample, located in the media data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    /// Absolute offset of the first NAL byte, after the length prefix
    pub offset: u64,
    /// NAL size in bytes, excluding the length prefix
    pub size: u32,
}

/// Timing and layout of one media sample within a fragment.
///
/// Timestamps are in 90 kHz ticks once produced by
/// [`SampleTiming`](crate::format::ts::SampleTiming).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRecord {
    /// Absolute offset of the sample in the media data
    pub offset: u64,
    /// Sample size in bytes
    pub size: u32,
    /// NAL units of a video sample, in stream order
    pub nal_units: Vec<NalUnit>,
    /// Sample is a sync (IDR) frame
    pub is_iframe: bool,
    /// Decode timestamp
    pub dts: u64,
    /// Composition (presentation) timestamp
    pub cts: u64,
    /// Program clock reference carried with this sample
    pub pcr: Option<u64>,
}

impl SampleRecord {
    /// True when the sample carries a PCR
    pub fn has_pcr(&self) -> bool {
        self.pcr.is_some()
    }
}
