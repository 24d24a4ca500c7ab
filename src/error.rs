//! Error types for EchoPort

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchoPortError {
    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Seek error: {0}")]
    Seek(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EchoPortError>;

/// Integer result codes for the C-callable surface. Zero is success,
/// everything else is negative so callers can branch on sign alone.
pub const RESULT_SUCCESS: i32 = 0;
pub const RESULT_ERROR: i32 = -1;
pub const RESULT_INVALID_HANDLE: i32 = -2;
pub const RESULT_BACKEND_UNAVAILABLE: i32 = -3;
pub const RESULT_DEVICE_NOT_FOUND: i32 = -4;
pub const RESULT_STREAM_FAILED: i32 = -5;
pub const RESULT_DECODE_FAILED: i32 = -6;
pub const RESULT_SEEK_FAILED: i32 = -7;
pub const RESULT_IO_FAILED: i32 = -8;

impl EchoPortError {
    /// The result code this error maps to at the C boundary.
    pub fn result_code(&self) -> i32 {
        match self {
            EchoPortError::Backend(_) => RESULT_BACKEND_UNAVAILABLE,
            EchoPortError::Device(_) => RESULT_DEVICE_NOT_FOUND,
            EchoPortError::Stream(_) => RESULT_STREAM_FAILED,
            EchoPortError::Decode(_) => RESULT_DECODE_FAILED,
            EchoPortError::Seek(_) => RESULT_SEEK_FAILED,
            EchoPortError::Io(_) => RESULT_IO_FAILED,
        }
    }
}

/// Human-readable description for a result code. Total: unknown codes
/// map to a generic message rather than failing.
pub fn describe_result_code(code: i32) -> &'static str {
    match code {
        RESULT_SUCCESS => "no error",
        RESULT_ERROR => "generic error",
        RESULT_INVALID_HANDLE => "invalid or null handle",
        RESULT_BACKEND_UNAVAILABLE => "audio backend unavailable",
        RESULT_DEVICE_NOT_FOUND => "audio device not found",
        RESULT_STREAM_FAILED => "stream operation failed",
        RESULT_DECODE_FAILED => "decode failed",
        RESULT_SEEK_FAILED => "seek failed",
        RESULT_IO_FAILED => "input/output failed",
        _ => "unknown error",
    }
}
