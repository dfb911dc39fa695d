use thiserror::Error;

/// Failure kinds surfaced by the package reader. Each variant carries a
/// short human message; causes are not chained.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("failed to open file: {0}")]
    FileOpen(String),
    #[error("read failed: {0}")]
    FileRead(String),
    #[error("seek failed: {0}")]
    FileSeek(String),
    #[error("write failed: {0}")]
    FileWrite(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("malformed zip archive: {0}")]
    ZipMalformed(String),
    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),
    #[error("corrupt deflate data: {0}")]
    InflateCorrupt(String),
    #[error("block map semantic error: {0}")]
    BlockMapSemanticError(String),
    #[error("block hash mismatch: {0}")]
    BlockHashMismatch(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Stable integer code for the kind, for use at process boundaries.
    /// Zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            Error::FileOpen(_) => 1,
            Error::FileRead(_) => 2,
            Error::FileSeek(_) => 3,
            Error::FileWrite(_) => 4,
            Error::FileNotFound(_) => 5,
            Error::ZipMalformed(_) => 6,
            Error::UnsupportedCompression(_) => 7,
            Error::InflateCorrupt(_) => 8,
            Error::BlockMapSemanticError(_) => 9,
            Error::BlockHashMismatch(_) => 10,
            Error::InvalidParameter(_) => 11,
            Error::NotImplemented => 12,
            Error::Unexpected(_) => 13,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
