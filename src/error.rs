use std::fmt;
use thiserror::Error;

/// Descriptor tables the sample timing engine reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Per-sample size table (`stsz`)
    SampleSize,
    /// Time-to-sample run-length table (`stts`)
    TimeToSample,
    /// Composition-offset run-length table (`ctts`)
    CompositionOffset,
    /// Raw media data region (`mdat`)
    MediaData,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::SampleSize => "sample size",
            Table::TimeToSample => "time-to-sample",
            Table::CompositionOffset => "composition offset",
            Table::MediaData => "media data",
        };
        f.write_str(name)
    }
}

/// Errors produced while building a transport-stream segment.
///
/// Every variant is fatal for the fragment being built: callers discard the
/// fragment rather than emitting part of it.
#[derive(Error, Debug)]
pub enum MuxError {
    /// A descriptor table holds fewer entries than the fragment needs.
    #[error("{table} table too short: needed {needed}, available {available}")]
    TableExhausted {
        /// The short table
        table: Table,
        /// Entries (or bytes, for media data) the fragment required
        needed: usize,
        /// Entries (or bytes) actually present
        available: usize,
    },

    /// Descriptor content that cannot describe a valid stream.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Serialized content larger than the fixed-size structure holding it.
    #[error("{what} overflow: needed {needed} bytes, capacity {capacity}")]
    CapacityExceeded {
        /// Structure that overflowed
        what: &'static str,
        /// Bytes the content requires
        needed: usize,
        /// Bytes available
        capacity: usize,
    },

    /// Clock scaling produced a value outside the 33-bit timestamp range.
    #[error("timestamp overflow: {value} scaled by {scale} does not fit in 33 bits")]
    TimestampOverflow {
        /// Unscaled value
        value: u64,
        /// Clock-scale factor applied
        scale: f64,
    },

    /// A field value wider than its encoded width.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A byte-granular write attempted on a cursor inside a byte.
    #[error("bit cursor not byte-aligned at bit {offset}")]
    Misaligned {
        /// Bit offset of the cursor
        offset: usize,
    },

    /// Failure while parsing generated packets back.
    #[error("parser error: {0}")]
    Parser(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MuxError>;
