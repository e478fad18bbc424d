//! # Protocol Module
//!
//! Everything that knows the FIX-Net text format lives here: framing, data
//! sentences, quality flag bits, report descriptors and typed values. Nothing
//! in this module performs I/O.

/// Quality flags and their bit / letter encodings.
pub mod flags;
/// Frame decoding and request encoding.
pub mod frame;
/// Byte accumulation and line splitting with explicit error recovery.
pub mod line_buffer;
/// Report descriptor parsing.
pub mod report;
/// Data types and value conversion.
pub mod value;

pub use flags::{parse_flag_bool, QualityFlag, QualityFlags};
pub use frame::{decode_frame, DataUpdate, Frame, ReadResult, Request, WriteEcho};
pub use line_buffer::LineBuffer;
pub use report::{RateStats, Report};
pub use value::{DataType, Value};
