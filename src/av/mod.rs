//! Container-level descriptions of a media stream and the per-sample records
//! derived from them.

/// Codecs the segment encoder can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    /// H.264 / AVC video with length-prefixed NAL units
    H264,
    /// AAC audio as raw access units
    AAC,
}

impl CodecType {
    /// True for video codecs
    pub fn is_video(&self) -> bool {
        matches!(self, CodecType::H264)
    }
}

mod sample;
mod stream;

pub use sample::*;
pub use stream::*;
