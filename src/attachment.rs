//! File attachments and their sealed content.
//!
//! Each attachment carries its own keys: content is encrypted with
//! Twofish-CBC under EK (PKCS#7 padded) and authenticated with
//! HMAC-SHA256 under AK over the plaintext. Both keys live inside the
//! attachment record, so they are protected by the database keys.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use hmac::Mac;
use tracing::debug;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::cbc::CbcStream;
use crate::crypto::{
    BLOCK_LEN, HASH_LEN, HmacSha256, KEY_LEN, digests_match, hashed_random, hmac, secure_random,
};
use crate::error::{Error, Result};
use crate::format::attachment_type as at;
use crate::format::field::RawField;
use crate::format::header::{text, uuid};
use crate::time::PwsTime;

const CHUNK_LEN: usize = 64 * 1024;

/// Encrypted attachment content with the keys needed to open it.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedContent {
    iv: [u8; BLOCK_LEN],
    ek: Zeroizing<[u8; KEY_LEN]>,
    ak: Zeroizing<[u8; KEY_LEN]>,
    ciphertext: Vec<u8>,
    digest: [u8; HASH_LEN],
}

impl std::fmt::Debug for SealedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedContent")
            .field("len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

impl SealedContent {
    /// Encrypts everything `input` yields under fresh keys.
    pub fn seal<R: Read>(mut input: R) -> Result<Self> {
        let mut iv = [0u8; BLOCK_LEN];
        iv.copy_from_slice(&hashed_random()?[..BLOCK_LEN]);
        let mut ek = Zeroizing::new([0u8; KEY_LEN]);
        let mut ak = Zeroizing::new([0u8; KEY_LEN]);
        secure_random(&mut ek[..])?;
        secure_random(&mut ak[..])?;

        let mut cbc = CbcStream::new(&ek[..], iv)?;
        let mut mac = hmac(&ak[..])?;
        let mut ciphertext = Vec::new();
        let mut chunk = Zeroizing::new(vec![0u8; CHUNK_LEN]);
        let mut block = [0u8; BLOCK_LEN];
        let mut filled = 0;

        loop {
            let n = match input.read(&mut chunk[..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::ReadFail(e)),
            };
            mac.update(&chunk[..n]);
            for byte in &chunk[..n] {
                block[filled] = *byte;
                filled += 1;
                if filled == BLOCK_LEN {
                    cbc.encrypt_block(&mut block);
                    ciphertext.extend_from_slice(&block);
                    filled = 0;
                }
            }
        }

        // PKCS#7: always at least one byte of padding.
        let pad = (BLOCK_LEN - filled) as u8;
        block[filled..].fill(pad);
        cbc.encrypt_block(&mut block);
        ciphertext.extend_from_slice(&block);
        block.zeroize();

        debug!(len = ciphertext.len(), "sealed attachment content");
        Ok(Self {
            iv,
            ek,
            ak,
            ciphertext,
            digest: mac.finalize().into_bytes().into(),
        })
    }

    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Decrypts and verifies; any mismatch is `BadDigest`.
    pub fn open(&self) -> Result<Zeroizing<Vec<u8>>> {
        let mut plain = Zeroizing::new(Vec::with_capacity(self.ciphertext.len()));
        self.decrypt_to(&mut *plain)?;
        Ok(plain)
    }

    /// Decrypts into `out` a chunk at a time and returns the plaintext length.
    ///
    /// The digest can only be checked after the last chunk, so on
    /// `BadDigest` whatever reached `out` must be discarded by the caller.
    pub fn decrypt_to<W: Write>(&self, mut out: W) -> Result<u64> {
        if self.ciphertext.is_empty() || self.ciphertext.len() % BLOCK_LEN != 0 {
            return Err(Error::BadDigest);
        }

        let mut cbc = CbcStream::new(&self.ek[..], self.iv)?;
        let mut mac: HmacSha256 = hmac(&self.ak[..])?;
        let mut pending = Zeroizing::new(Vec::with_capacity(CHUNK_LEN + BLOCK_LEN));
        let mut block = [0u8; BLOCK_LEN];
        let mut written = 0u64;

        let last = self.ciphertext.len() / BLOCK_LEN - 1;
        for (i, chunk) in self.ciphertext.chunks_exact(BLOCK_LEN).enumerate() {
            block.copy_from_slice(chunk);
            cbc.decrypt_block(&mut block);
            if i == last {
                break;
            }
            pending.extend_from_slice(&block);
            if pending.len() >= CHUNK_LEN {
                written += flush_chunk(&mut out, &mut mac, &mut pending)?;
            }
        }

        // the final block carries the PKCS#7 padding
        let pad = block[BLOCK_LEN - 1] as usize;
        let bad_padding = pad == 0
            || pad > BLOCK_LEN
            || block[BLOCK_LEN - pad..].iter().any(|b| *b as usize != pad);
        if !bad_padding {
            pending.extend_from_slice(&block[..BLOCK_LEN - pad]);
        }
        block.zeroize();
        if bad_padding {
            return Err(Error::BadDigest);
        }
        written += flush_chunk(&mut out, &mut mac, &mut pending)?;
        out.flush().map_err(Error::WriteFail)?;

        if !digests_match(&mac.finalize().into_bytes(), &self.digest) {
            return Err(Error::BadDigest);
        }
        Ok(written)
    }
}

fn flush_chunk<W: Write>(out: &mut W, mac: &mut HmacSha256, pending: &mut Vec<u8>) -> Result<u64> {
    mac.update(pending);
    out.write_all(pending).map_err(Error::WriteFail)?;
    let n = pending.len() as u64;
    pending.zeroize();
    Ok(n)
}

/// An attachment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    uuid: Uuid,
    pub title: String,
    pub media_type: String,
    pub file_name: String,
    pub file_path: String,
    pub created: Option<PwsTime>,
    pub file_created: Option<PwsTime>,
    pub file_modified: Option<PwsTime>,
    pub file_accessed: Option<PwsTime>,
    content: SealedContent,
    unknown: Vec<RawField>,
}

fn media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn file_time(t: io::Result<std::time::SystemTime>) -> Option<PwsTime> {
    let t = t.ok()?;
    let secs = t.duration_since(std::time::UNIX_EPOCH).ok()?.as_secs();
    Some(PwsTime::from_unix(secs as i64))
}

impl Attachment {
    pub fn from_reader<R: Read>(title: &str, file_name: &str, input: R) -> Result<Self> {
        Ok(Self {
            uuid: Uuid::new_v4(),
            title: title.to_owned(),
            media_type: media_type(Path::new(file_name)).to_owned(),
            file_name: file_name.to_owned(),
            file_path: String::new(),
            created: Some(PwsTime::now()),
            file_created: None,
            file_modified: None,
            file_accessed: None,
            content: SealedContent::seal(input)?,
            unknown: Vec::new(),
        })
    }

    /// Seals a file from disk, recording where it came from.
    pub fn from_file(title: &str, path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(Error::CantOpenFile)?;
        let meta = file.metadata().map_err(Error::ReadFail)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut attachment = Self::from_reader(title, &name, file)?;
        attachment.file_path = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        attachment.file_created = file_time(meta.created());
        attachment.file_modified = file_time(meta.modified());
        attachment.file_accessed = file_time(meta.accessed());
        Ok(attachment)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn content(&self) -> &SealedContent {
        &self.content
    }

    /// Verified plaintext content.
    pub fn open(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.content.open()
    }

    /// Streams the verified content to `out`.
    pub fn extract_to<W: Write>(&self, out: W) -> Result<u64> {
        self.content.decrypt_to(out)
    }

    pub fn from_fields(fields: Vec<RawField>) -> Result<Self> {
        let mut id = None;
        let mut title = String::new();
        let mut media = String::new();
        let mut file_name = String::new();
        let mut file_path = String::new();
        let mut created = None;
        let (mut fc, mut fm, mut fa) = (None, None, None);
        let mut iv = None;
        let mut ek = None;
        let mut ak = None;
        let mut ciphertext = None;
        let mut digest = None;
        let mut unknown = Vec::new();

        for field in fields {
            match field.field_type {
                at::ATTUUID => id = Some(uuid(&field)?),
                at::TITLE => title = text(&field),
                at::MEDIATYPE => media = text(&field),
                at::FILENAME => file_name = text(&field),
                at::FILEPATH => file_path = text(&field),
                at::CTIME => created = Some(PwsTime::decode(&field.data)),
                at::FILECTIME => fc = Some(PwsTime::decode(&field.data)),
                at::FILEMTIME => fm = Some(PwsTime::decode(&field.data)),
                at::FILEATIME => fa = Some(PwsTime::decode(&field.data)),
                at::ATTIV => iv = Some(fixed::<BLOCK_LEN>(&field)?),
                at::ATTEK => ek = Some(Zeroizing::new(fixed::<KEY_LEN>(&field)?)),
                at::ATTAK => ak = Some(Zeroizing::new(fixed::<KEY_LEN>(&field)?)),
                at::CONTENT => ciphertext = Some(field.data.to_vec()),
                at::CONTENTHMAC => digest = Some(fixed::<HASH_LEN>(&field)?),
                _ => unknown.push(field),
            }
        }

        let missing = |t| Error::invalid_field(t, "attachment field missing");
        Ok(Self {
            uuid: id.ok_or_else(|| missing(at::ATTUUID))?,
            title,
            media_type: media,
            file_name,
            file_path,
            created,
            file_created: fc,
            file_modified: fm,
            file_accessed: fa,
            content: SealedContent {
                iv: iv.ok_or_else(|| missing(at::ATTIV))?,
                ek: ek.ok_or_else(|| missing(at::ATTEK))?,
                ak: ak.ok_or_else(|| missing(at::ATTAK))?,
                ciphertext: ciphertext.ok_or_else(|| missing(at::CONTENT))?,
                digest: digest.ok_or_else(|| missing(at::CONTENTHMAC))?,
            },
            unknown,
        })
    }

    pub fn to_fields(&self) -> Vec<RawField> {
        let c = &self.content;
        let mut out = vec![
            RawField::new(at::ATTUUID, self.uuid.as_bytes().to_vec()),
            RawField::new(at::TITLE, self.title.as_bytes()),
            RawField::new(at::MEDIATYPE, self.media_type.as_bytes()),
            RawField::new(at::FILENAME, self.file_name.as_bytes()),
            RawField::new(at::FILEPATH, self.file_path.as_bytes()),
        ];
        let times = [
            (at::CTIME, self.created),
            (at::FILECTIME, self.file_created),
            (at::FILEMTIME, self.file_modified),
            (at::FILEATIME, self.file_accessed),
        ];
        for (code, t) in times {
            if let Some(t) = t {
                out.push(RawField::new(code, t.encode()));
            }
        }
        out.push(RawField::new(at::ATTEK, c.ek.to_vec()));
        out.push(RawField::new(at::ATTAK, c.ak.to_vec()));
        out.push(RawField::new(at::ATTIV, c.iv));
        out.push(RawField::new(at::CONTENT, c.ciphertext.clone()));
        out.push(RawField::new(at::CONTENTHMAC, c.digest));
        out.extend(self.unknown.iter().cloned());
        out.push(RawField::empty(at::END));
        out
    }
}

fn fixed<const N: usize>(field: &RawField) -> Result<[u8; N]> {
    field
        .data
        .as_slice()
        .try_into()
        .map_err(|_| Error::invalid_field(field.field_type, "wrong field length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use std::io::Cursor;

    #[test]
    fn sealed_content_opens_to_the_original() {
        for len in [0usize, 1, 15, 16, 17, CHUNK_LEN + 3] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let sealed = SealedContent::seal(Cursor::new(&data)).unwrap();
            assert_eq!(sealed.len() % BLOCK_LEN, 0);
            assert!(sealed.len() > len);
            assert_eq!(&sealed.open().unwrap()[..], &data[..]);
        }
    }

    #[test]
    fn every_seal_uses_fresh_keys() {
        let a = SealedContent::seal(Cursor::new(b"same")).unwrap();
        let b = SealedContent::seal(Cursor::new(b"same")).unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn tampered_content_fails_verification() {
        let mut sealed = SealedContent::seal(Cursor::new(vec![7u8; 100])).unwrap();
        sealed.ciphertext[3] ^= 0x80;
        assert!(matches!(sealed.open(), Err(Error::BadDigest)));
    }

    #[test]
    fn large_content_streams_in_chunks() {
        let data: Vec<u8> = (0..3 * CHUNK_LEN + 5).map(|i| (i % 253) as u8).collect();
        let sealed = SealedContent::seal(Cursor::new(data.clone())).unwrap();

        let mut out = Vec::new();
        assert_eq!(sealed.decrypt_to(&mut out).unwrap(), data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn streamed_tamper_in_last_chunk_is_caught() {
        let mut sealed = SealedContent::seal(Cursor::new(vec![9u8; 2 * CHUNK_LEN])).unwrap();
        let n = sealed.ciphertext.len();
        // second to last block: plaintext, not padding
        sealed.ciphertext[n - 2 * BLOCK_LEN] ^= 0x01;

        let mut out = Vec::new();
        assert!(matches!(sealed.decrypt_to(&mut out), Err(Error::BadDigest)));
    }

    #[test]
    fn swapped_auth_key_fails_verification() {
        let mut sealed = SealedContent::seal(Cursor::new(b"report")).unwrap();
        sealed.ak = Zeroizing::new([0u8; KEY_LEN]);
        assert!(matches!(sealed.open(), Err(Error::BadDigest)));
    }

    #[test]
    fn attachment_record_round_trips() {
        let att = Attachment::from_reader("scan", "passport.PNG", Cursor::new(vec![1u8; 40])).unwrap();
        assert_eq!(att.media_type, "image/png");

        let mut fields = att.to_fields();
        assert_eq!(fields.pop().map(|f| f.field_type), Some(at::END));
        let Record::Attachment(back) = Record::from_fields(fields).unwrap() else {
            panic!("expected attachment");
        };
        assert_eq!(back, att);
        assert_eq!(&back.open().unwrap()[..], &[1u8; 40][..]);
    }

    #[test]
    fn attachment_without_keys_is_invalid() {
        let fields = vec![RawField::new(at::ATTUUID, Uuid::new_v4().as_bytes().to_vec())];
        assert!(matches!(
            Attachment::from_fields(fields),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn from_file_records_name_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let att = Attachment::from_file("notes", &path).unwrap();
        assert_eq!(att.file_name, "notes.txt");
        assert_eq!(att.media_type, "text/plain");
        assert_eq!(att.file_path, dir.path().to_string_lossy());
        assert!(att.file_modified.is_some());

        let mut out = Vec::new();
        assert_eq!(att.extract_to(&mut out).unwrap(), 5);
        assert_eq!(out, b"hello");
    }
}
