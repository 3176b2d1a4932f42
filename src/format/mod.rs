//! Media container formats.

pub mod ts;

pub use self::ts::{SegmentAssembler, TSPacketParser};
