//! # MPEG Transport Stream (TS) segment encoding
//!
//! Everything needed to turn timed samples into the 188-byte packets of an
//! HLS segment:
//!
//! - Packet headers, adaptation fields and PCRs
//! - Program Specific Information (PAT and PMT sections)
//! - Packetized Elementary Stream (PES) framing, with Annex B video and ADTS audio
//! - Sample timing: DTS/CTS and PCR derivation from run-length tables
//! - Segment assembly with per-PID continuity counters
//! - A packet parser for validating generated output
//!
//! ## Example Usage
//!
//! ```rust
//! use hlsmux::av::{CodecType, MediaData, SampleSizes, StreamInfo, TimeToSampleEntry};
//! use hlsmux::config::TsConfig;
//! use hlsmux::format::ts::{SampleTiming, SegmentAssembler, TrackFragment, TS_PACKET_SIZE};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // One 8-byte IDR sample: a 4-byte length prefix and a 4-byte NAL
//! let stream = StreamInfo::new(CodecType::H264, 90_000)
//!     .with_sample_sizes(SampleSizes::PerSample(vec![8]))
//!     .with_time_to_sample(vec![TimeToSampleEntry { sample_count: 1, sample_delta: 3000 }])
//!     .with_sync_samples(vec![0])
//!     .with_media_data(MediaData::new(0, vec![0, 0, 0, 4, 0x65, 0x88, 0x84, 0x00]));
//!
//! let fragment = stream.fragment(0, 1)?;
//! let records = SampleTiming::new().records(&stream, &fragment)?;
//!
//! let mut assembler = SegmentAssembler::new(TsConfig::default());
//! let segment = assembler.assemble(&[TrackFragment::new(&stream, &records)])?;
//! assert_eq!(segment.len(), 3 * TS_PACKET_SIZE);
//! # Ok(())
//! # }
//! ```

/// Periodic emission of per-sample elements such as PCRs
pub mod emitter;

/// Transport packets and PSI-carrying packets
pub mod packet;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES packet framing
pub mod pes;

/// PAT and PMT sections
pub mod psi;

/// Segment assembly
pub mod segment;

/// Per-sample timing derived from stream tables
pub mod timing;

/// Core TS types and constants
pub mod types;

pub use emitter::PeriodicEmitter;
pub use packet::{PsiPacket, TSPacket};
pub use parser::{ParsedPacket, PsiSection, TSPacketParser};
pub use pes::{AdtsHeader, PesHeader, PesPacket};
pub use psi::{Descriptor, PatEntry, PatSection, PmtSection, PmtStream};
pub use segment::{HexDumpObserver, PacketObserver, SegmentAssembler, TrackFragment};
pub use timing::{scale_clock, SampleTiming};
pub use types::*;
