//! Derived-variant production: ffprobe metadata, ffmpeg audio encoding with
//! progress reporting, and in-process image resizing.

pub mod audio;
pub mod error_filter;
pub mod ffprobe;
pub mod image_ops;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("ffprobe failed: {0}")]
    Probe(String),

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("image decode failed: {0}")]
    ImageDecode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
