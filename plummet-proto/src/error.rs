//! Custom error type definitions.

use hickory_proto::error::ProtoError;
use thiserror::Error;

/// Errors that may arise while encoding or decoding a message.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Message too short: the header needs 12 bytes, got {0}.")]
    ShortHeader(usize),

    #[error("Message ended in the middle of the {0}.")]
    Truncated(&'static str),

    #[error("Message contains more than one OPT record.")]
    DuplicateOpt,

    #[error("Section has too many records to encode: {0}.")]
    TooManyRecords(usize),

    #[error("Malformed data for EDNS option {0}.")]
    InvalidOption(u16),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Could not de-/serialize records: {0}")]
    Codec(#[from] ProtoError),

    #[error("IO error.")]
    Io(#[from] std::io::Error),
}
