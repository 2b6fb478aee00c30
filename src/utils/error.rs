use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::decoders::jpeg::marker::JpegMarker;

#[derive(Error, Debug)]
pub enum VexelError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported sample precision: {0} bits (only 8-bit samples are supported)")]
    UnsupportedPrecision(u8),

    #[error("Unsupported colorspace: {0}")]
    UnsupportedColorspace(String),

    #[error("Unsupported marker: {0:?}")]
    UnsupportedMarker(JpegMarker),

    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    #[error("Bitstream underflow: requested {requested} bits, {available} available")]
    BitstreamUnderflow { requested: u32, available: u32 },
}

impl VexelError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        VexelError::CorruptSegment(message.into())
    }
}

// Result type alias for Vexel operations
pub type VexelResult<T> = Result<T, VexelError>;
