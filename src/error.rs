use std::fmt;
use std::io;

/// Classification of container failures.
///
/// Callers decide what to show the user; this layer only classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CantOpenFile,
    WrongPassword,
    TruncatedFile,
    BadDigest,
    UnsupportedVersion,
    WriteFail,
    ReadFail,
    WeakIterations,
    ExcessiveIterations,
    LastKeyBlock,
    InvalidField,
    InvalidKeyLength,
    Random,
    Store,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot open database file")]
    CantOpenFile(#[source] io::Error),

    #[error("wrong password")]
    WrongPassword,

    #[error("database file is truncated")]
    TruncatedFile,

    #[error("integrity check failed: database is corrupt or has been tampered with")]
    BadDigest,

    #[error("unsupported database version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("failed to write database")]
    WriteFail(#[source] io::Error),

    #[error("failed to read database")]
    ReadFail(#[source] io::Error),

    #[error("hash iteration count {found} is below the minimum of {minimum}")]
    WeakIterations { found: u32, minimum: u32 },

    #[error("hash iteration count {found} is above the maximum of {maximum}")]
    ExcessiveIterations { found: u32, maximum: u32 },

    #[error("cannot remove the last remaining passphrase")]
    LastKeyBlock,

    #[error("invalid field 0x{field_type:02x}: {reason}")]
    InvalidField { field_type: u8, reason: &'static str },

    #[error("invalid cipher key length")]
    InvalidKeyLength,

    #[error("OS random generator unavailable")]
    Random,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CantOpenFile(_) => ErrorKind::CantOpenFile,
            Error::WrongPassword => ErrorKind::WrongPassword,
            Error::TruncatedFile => ErrorKind::TruncatedFile,
            Error::BadDigest => ErrorKind::BadDigest,
            Error::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Error::WriteFail(_) => ErrorKind::WriteFail,
            Error::ReadFail(_) => ErrorKind::ReadFail,
            Error::WeakIterations { .. } => ErrorKind::WeakIterations,
            Error::ExcessiveIterations { .. } => ErrorKind::ExcessiveIterations,
            Error::LastKeyBlock => ErrorKind::LastKeyBlock,
            Error::InvalidField { .. } => ErrorKind::InvalidField,
            Error::InvalidKeyLength => ErrorKind::InvalidKeyLength,
            Error::Random => ErrorKind::Random,
            Error::Store(_) => ErrorKind::Store,
        }
    }

    /// Maps a short read on a fixed-size structure to `TruncatedFile`.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedFile
        } else {
            Error::ReadFail(err)
        }
    }

    pub(crate) fn invalid_field(field_type: u8, reason: &'static str) -> Self {
        Error::InvalidField { field_type, reason }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum StoreError {
    EntryAlreadyExists(String),
    EntryNotFound(String),
    AttachmentNotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::EntryAlreadyExists(t) => write!(f, "entry '{t}' already exists"),
            StoreError::EntryNotFound(t) => write!(f, "entry '{t}' not found"),
            StoreError::AttachmentNotFound(t) => write!(f, "attachment '{t}' not found"),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_is_truncation() {
        let err = Error::from_read(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::TruncatedFile);

        let err = Error::from_read(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), ErrorKind::ReadFail);
    }

    #[test]
    fn store_errors_name_the_entry() {
        let err: Error = StoreError::EntryNotFound("github".into()).into();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(err.to_string(), "entry 'github' not found");
    }
}
