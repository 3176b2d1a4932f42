#![doc(html_root_url = "https://docs.rs/hlsmux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # hlsmux - MPEG-TS segment encoder for HLS
//!
//! `hlsmux` turns the sample tables of an MP4 track (sizes, run-length time
//! tables, sync samples and the raw media data) into the MPEG transport
//! stream segments served by HLS. It works entirely in memory: callers hand
//! over decoded descriptors and receive owned bytes back.
//!
//! ## Features
//!
//! - Bit-granular serialization buffer with CRC-32/MPEG-2 support
//! - PAT/PMT sections, transport packets, adaptation fields and PCRs
//! - DTS/CTS/PCR derivation from time-to-sample and composition tables
//! - Annex B H.264 and ADTS AAC payload framing
//! - Fragment planning on sync samples
//! - A parser to read generated packets back
//!
//! ## Quick Start
//!
//! ```rust
//! use hlsmux::av::{CodecType, MediaData, SampleSizes, StreamInfo, TimeToSampleEntry};
//! use hlsmux::format::ts::{SampleTiming, SegmentAssembler, TrackFragment};
//! use hlsmux::config::TsConfig;
//! use std::time::Duration;
//!
//! # fn main() -> hlsmux::Result<()> {
//! let payload: Vec<u8> = (0..30).flat_map(|_| [0, 0, 0, 1, 0x65]).collect();
//! let stream = StreamInfo::new(CodecType::H264, 30_000)
//!     .with_sample_sizes(SampleSizes::Uniform(5))
//!     .with_time_to_sample(vec![TimeToSampleEntry { sample_count: 30, sample_delta: 1_000 }])
//!     .with_sync_samples(vec![0, 10, 20])
//!     .with_media_data(MediaData::new(0, payload));
//!
//! let timing = SampleTiming::new();
//! let mut assembler = SegmentAssembler::new(TsConfig::default());
//! for fragment in stream.plan_fragments(Duration::from_millis(300))? {
//!     let records = timing.records(&stream, &fragment)?;
//!     let segment = assembler.assemble(&[TrackFragment::new(&stream, &records)])?;
//!     assert_eq!(segment.len() % 188, 0);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: Stream descriptors and per-sample records
//!   - Run-length time tables and their cursors
//!   - Fragment location and planning
//!
//! - `format`: The transport stream encoder
//!   - PSI tables, packets, PES framing
//!   - Sample timing and segment assembly
//!
//! - `config`: Transport stream PIDs and program settings
//!
//! - `error`: Error handling types and utilities
//!
//! - `utils`: Bit buffers and CRC calculations
//!
/// Stream descriptors and sample records
pub mod av;

/// Transport stream configuration
pub mod config;

/// Error types and utilities
pub mod error;

/// Media format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

pub use error::{MuxError, Result};
