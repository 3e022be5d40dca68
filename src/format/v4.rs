//! Version 4 container.
//!
//! ```text
//! NONCE (32)
//! KEY BLOCK (116) ...
//! SHA256(NONCE) (32)
//! END KEY BLOCKS DIGEST (32)   HMAC(L, key blocks | SHA256(NONCE))
//! IV (16)
//! header fields .. END | record fields .. END | ...   one CBC chain under K
//! HMAC (32)                    HMAC(L, TYPE | LENGTH | DATA of every field)
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, info, warn};

use super::field::{FieldReader, FieldWriter, RawField};
use super::header::{Header, HeaderField};
use super::{FormatVersion, entry_type, header_type};
use crate::context::WriterContext;
use crate::crypto::cbc::CbcStream;
use crate::crypto::keyblock::KEY_BLOCK_LEN;
use crate::crypto::{
    BLOCK_LEN, HASH_LEN, KeyBlockSet, NONCE_LEN, SessionKeys, hashed_random, hmac,
};
use crate::error::{Error, Result};
use crate::record::Record;

/// Smallest well-formed file: one key block and a single header field.
pub const MIN_FILE_LEN: u64 =
    (NONCE_LEN + KEY_BLOCK_LEN + HASH_LEN + HASH_LEN + BLOCK_LEN + BLOCK_LEN + HASH_LEN) as u64;

fn session_iv() -> Result<[u8; BLOCK_LEN]> {
    let mut iv = [0u8; BLOCK_LEN];
    iv.copy_from_slice(&hashed_random()?[..BLOCK_LEN]);
    Ok(iv)
}

/// Write session. Records follow the header; [`close`](Self::close)
/// appends the HMAC.
pub struct ContainerWriter<W: Write> {
    fields: FieldWriter<W>,
    records: usize,
}

impl<W: Write> ContainerWriter<W> {
    /// Unlocks `key_blocks` with `passphrase`, or creates the first block if
    /// the set is empty, then writes everything up to the first record.
    pub fn open(
        out: W,
        key_blocks: &mut KeyBlockSet,
        passphrase: &str,
        header: &mut Header,
        context: &WriterContext,
    ) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::WrongPassword);
        }

        let keys = if key_blocks.is_empty() {
            key_blocks.add_block(None, passphrase, context.kdf)?
        } else {
            key_blocks.unlock(passphrase)?.1
        };
        Self::with_keys(out, key_blocks, &keys, header, context)
    }

    /// Writes with session keys recovered earlier.
    pub fn with_keys(
        mut out: W,
        key_blocks: &KeyBlockSet,
        keys: &SessionKeys,
        header: &mut Header,
        context: &WriterContext,
    ) -> Result<Self> {
        if key_blocks.is_empty() {
            return Err(Error::WrongPassword);
        }

        key_blocks.write_section(&mut out, keys)?;
        let iv = session_iv()?;
        out.write_all(&iv).map_err(Error::WriteFail)?;

        let cbc = CbcStream::new(keys.encryption_key(), iv)?;
        let mac = hmac(keys.hmac_key())?;
        let mut fields = FieldWriter::new(out, cbc, mac);

        header.stamp(FormatVersion::V4, context);
        for field in header.to_fields() {
            let raw = field.encode();
            fields.write_field(raw.field_type, &raw.data)?;
        }
        debug!(key_blocks = key_blocks.len(), "header written");

        Ok(Self { fields, records: 0 })
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        for raw in record.to_fields() {
            self.fields.write_field(raw.field_type, &raw.data)?;
        }
        self.records += 1;
        Ok(())
    }

    /// Appends the file HMAC and returns the sink.
    pub fn close(self) -> Result<W> {
        let records = self.records;
        let out = self.fields.finish()?;
        info!(records, "container written");
        Ok(out)
    }
}

/// Read session over a seekable source.
pub struct ContainerReader<R: Read> {
    fields: FieldReader<R>,
    header: Header,
    key_blocks: KeyBlockSet,
    keys: SessionKeys,
    verified: Option<bool>,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Unlocks the file and reads the header; records are read on demand.
    pub fn open(mut input: R, passphrase: &str) -> Result<Self> {
        let total = input.seek(SeekFrom::End(0)).map_err(Error::ReadFail)?;
        input.rewind().map_err(Error::ReadFail)?;
        if total < MIN_FILE_LEN {
            return Err(Error::TruncatedFile);
        }

        let (key_blocks, sentinel) = KeyBlockSet::read_section(&mut input)?;
        let (_, keys) = key_blocks.unlock(passphrase)?;
        key_blocks.verify_end_digest(&mut input, &sentinel, &keys)?;

        let mut iv = [0u8; BLOCK_LEN];
        input.read_exact(&mut iv).map_err(Error::from_read)?;
        let position = input.stream_position().map_err(Error::ReadFail)?;

        // Records come in whole cipher blocks; anything else lost bytes.
        let end = total - HASH_LEN as u64;
        if end < position || (end - position) % BLOCK_LEN as u64 != 0 {
            return Err(Error::TruncatedFile);
        }

        let cbc = CbcStream::new(keys.encryption_key(), iv)?;
        let mac = hmac(keys.hmac_key())?;
        let mut reader = Self {
            fields: FieldReader::new(input, cbc, mac, position, end),
            header: Header::new(),
            key_blocks,
            keys,
            verified: None,
        };

        if let Err(err) = reader.read_header() {
            return Err(reader.settle(err));
        }
        if reader.header.version.is_none() {
            warn!("header carries no version field");
        }
        debug!(
            key_blocks = reader.key_blocks.len(),
            db_name = reader.header.db_name.as_deref().unwrap_or(""),
            "container opened"
        );
        Ok(reader)
    }
}

impl<R: Read> ContainerReader<R> {
    fn read_header(&mut self) -> Result<()> {
        loop {
            let raw = self.fields.read_field()?;
            if raw.field_type == header_type::END {
                return Ok(());
            }
            self.header.apply(HeaderField::decode(raw)?)?;
        }
    }

    /// A field that fails to decode may just be tampered ciphertext. The
    /// file HMAC decides which error the caller sees.
    fn settle(&mut self, err: Error) -> Error {
        if matches!(err, Error::BadDigest | Error::TruncatedFile | Error::ReadFail(_)) {
            return err;
        }
        match self.drain_and_verify() {
            Ok(()) => err,
            Err(digest_err) => digest_err,
        }
    }

    fn drain_and_verify(&mut self) -> Result<()> {
        match self.verified {
            Some(true) => return Ok(()),
            Some(false) => return Err(Error::BadDigest),
            None => {}
        }
        let result = self.drain();
        self.verified = Some(result.is_ok());
        result
    }

    fn drain(&mut self) -> Result<()> {
        while !self.fields.at_end() {
            self.fields.read_field()?;
        }
        self.fields.finish()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn key_blocks(&self) -> &KeyBlockSet {
        &self.key_blocks
    }

    /// Recovered K and L, for rewriting with [`ContainerWriter::with_keys`].
    pub fn session_keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Next record, or `None` once the record area is exhausted.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.verified.is_some() || self.fields.at_end() {
            return Ok(None);
        }

        let mut raw: Vec<RawField> = Vec::new();
        loop {
            if self.fields.at_end() {
                return Err(Error::BadDigest);
            }
            let field = self.fields.read_field()?;
            if field.field_type == entry_type::END {
                break;
            }
            raw.push(field);
        }

        match Record::from_fields(raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => Err(self.settle(err)),
        }
    }

    /// Skips any unread records and checks the file HMAC.
    ///
    /// Until this succeeds nothing read from the file can be trusted.
    pub fn close(mut self) -> Result<()> {
        self.drain_and_verify()?;
        debug!("container digest verified");
        Ok(())
    }

    /// Reads every record, then verifies the file.
    pub fn read_all(mut self) -> Result<(Header, KeyBlockSet, SessionKeys, Vec<Record>)> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        self.drain_and_verify()?;
        info!(records = records.len(), "container read");
        Ok((self.header, self.key_blocks, self.keys, records))
    }
}

/// Whether `passphrase` unlocks any key block of the container in `input`.
///
/// Only the key-block section is read.
pub fn check_passkey<R: Read>(mut input: R, passphrase: &str) -> Result<bool> {
    let (key_blocks, sentinel) = KeyBlockSet::read_section(&mut input)?;
    match key_blocks.try_unlock(passphrase)? {
        Some((_, keys)) => {
            key_blocks.verify_end_digest(&mut input, &sentinel, &keys)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
