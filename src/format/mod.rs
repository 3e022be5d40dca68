//! On-disk container format.
//!
//! Provides the field codec, the typed header record, and the version-aware
//! reader and writer for the container.

use std::io::{Read, Seek, Write};

use crate::context::WriterContext;
use crate::crypto::{KeyBlockSet, SessionKeys};
use crate::error::{Error, Result};

pub mod field;
pub mod header;
pub mod v4;

pub use field::RawField;
pub use header::{Header, HeaderField};
pub use v4::{ContainerReader, ContainerWriter};

/// Header field types.
pub mod header_type {
    pub const VERSION: u8 = 0x00;
    pub const UUID: u8 = 0x01;
    pub const NDPREFS: u8 = 0x02;
    pub const DISPSTAT: u8 = 0x03;
    pub const LAST_UPDATE_TIME: u8 = 0x04;
    /// Deprecated combined user/host field, read only.
    pub const LAST_UPDATE_USER_HOST: u8 = 0x05;
    pub const LAST_UPDATE_APPLICATION: u8 = 0x06;
    pub const LAST_UPDATE_USER: u8 = 0x07;
    pub const LAST_UPDATE_HOST: u8 = 0x08;
    pub const DB_NAME: u8 = 0x09;
    pub const DB_DESC: u8 = 0x0a;
    pub const FILTERS: u8 = 0x0b;
    pub const RUE: u8 = 0x0f;
    pub const PASSWORD_POLICIES: u8 = 0x10;
    pub const EMPTY_GROUP: u8 = 0x11;
    pub const YUBI_SK: u8 = 0x12;
    pub const LAST_PASSWORD_UPDATE_TIME: u8 = 0x13;
    pub const END: u8 = 0xff;
}

/// Entry (item) field types.
pub mod entry_type {
    pub const UUID: u8 = 0x01;
    pub const GROUP: u8 = 0x02;
    pub const TITLE: u8 = 0x03;
    pub const USER: u8 = 0x04;
    pub const NOTES: u8 = 0x05;
    pub const PASSWORD: u8 = 0x06;
    pub const CTIME: u8 = 0x07;
    pub const PMTIME: u8 = 0x08;
    pub const ATIME: u8 = 0x09;
    pub const XTIME: u8 = 0x0a;
    pub const RMTIME: u8 = 0x0c;
    pub const URL: u8 = 0x0d;
    pub const AUTOTYPE: u8 = 0x0e;
    pub const PWHIST: u8 = 0x0f;
    pub const POLICY: u8 = 0x10;
    pub const XTIME_INT: u8 = 0x11;
    pub const RUNCMD: u8 = 0x12;
    pub const DCA: u8 = 0x13;
    pub const EMAIL: u8 = 0x14;
    pub const PROTECTED: u8 = 0x15;
    pub const SYMBOLS: u8 = 0x16;
    pub const SHIFTDCA: u8 = 0x17;
    pub const POLICYNAME: u8 = 0x18;
    pub const KBSHORTCUT: u8 = 0x19;
    pub const ATTREF: u8 = 0x1a;
    pub const BASEUUID: u8 = 0x41;
    pub const ALIASUUID: u8 = 0x42;
    pub const SHORTCUTUUID: u8 = 0x43;
    pub const END: u8 = 0xff;
}

/// Attachment record field types.
pub mod attachment_type {
    pub const ATTUUID: u8 = 0x60;
    pub const TITLE: u8 = 0x61;
    pub const CTIME: u8 = 0x62;
    pub const MEDIATYPE: u8 = 0x63;
    pub const FILENAME: u8 = 0x64;
    pub const FILEPATH: u8 = 0x65;
    pub const FILECTIME: u8 = 0x66;
    pub const FILEMTIME: u8 = 0x67;
    pub const FILEATIME: u8 = 0x68;
    pub const ATTEK: u8 = 0x69;
    pub const ATTAK: u8 = 0x6a;
    pub const ATTIV: u8 = 0x6b;
    pub const CONTENT: u8 = 0x6c;
    pub const CONTENTHMAC: u8 = 0x6d;
    pub const END: u8 = 0xff;
}

/// Container format versions this crate reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V4,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V4;

    pub fn major(self) -> u8 {
        match self {
            FormatVersion::V4 => 0x04,
        }
    }

    pub fn minor(self) -> u8 {
        match self {
            FormatVersion::V4 => 0x00,
        }
    }

    /// Minor versions are assumed backward compatible; a major mismatch is not.
    pub fn from_parts(major: u8, minor: u8) -> Result<Self> {
        match major {
            0x04 => Ok(FormatVersion::V4),
            _ => Err(Error::UnsupportedVersion { major, minor }),
        }
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.major(), self.minor())
    }
}

/// Opens `input` for reading with the reader for `version`.
pub fn open_reader<R: Read + Seek>(
    version: FormatVersion,
    input: R,
    passphrase: &str,
) -> Result<ContainerReader<R>> {
    match version {
        FormatVersion::V4 => ContainerReader::open(input, passphrase),
    }
}

/// Starts a write session on `out` with the writer for `version`.
pub fn create_writer<W: Write>(
    version: FormatVersion,
    out: W,
    key_blocks: &KeyBlockSet,
    keys: &SessionKeys,
    header: &mut Header,
    context: &WriterContext,
) -> Result<ContainerWriter<W>> {
    match version {
        FormatVersion::V4 => ContainerWriter::with_keys(out, key_blocks, keys, header, context),
    }
}
