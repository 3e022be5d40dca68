//! CBC field codec.
//!
//! Plaintext of one field, before encryption:
//! ```text
//! LENGTH (4, le i32) | TYPE (1) | DATA[..11] | DATA[11..] padded to 16 with random bytes
//! ```
//! Every field feeds `TYPE | LENGTH | DATA` into the running HMAC.

use std::io::{Read, Write};

use hmac::Mac;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::cbc::CbcStream;
use crate::crypto::{BLOCK_LEN, HASH_LEN, HmacSha256, digests_match, secure_random};
use crate::error::{Error, Result};

const LEN_LEN: usize = 4;
const FIRST_BLOCK_DATA: usize = BLOCK_LEN - LEN_LEN - 1;

/// One decrypted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub field_type: u8,
    pub data: Zeroizing<Vec<u8>>,
}

impl RawField {
    pub fn new(field_type: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            field_type,
            data: Zeroizing::new(data.into()),
        }
    }

    pub fn empty(field_type: u8) -> Self {
        Self::new(field_type, Vec::new())
    }
}

/// Bytes a field of `len` data bytes occupies on disk.
pub(crate) fn encoded_len(len: usize) -> usize {
    let rest = len.saturating_sub(FIRST_BLOCK_DATA);
    BLOCK_LEN * (1 + rest.div_ceil(BLOCK_LEN))
}

fn mac_field(mac: &mut HmacSha256, field_type: u8, len: i32, data: &[u8]) {
    mac.update(&[field_type]);
    mac.update(&len.to_le_bytes());
    mac.update(data);
}

pub(crate) struct FieldWriter<W: Write> {
    out: W,
    cbc: CbcStream,
    mac: HmacSha256,
}

impl<W: Write> FieldWriter<W> {
    pub fn new(out: W, cbc: CbcStream, mac: HmacSha256) -> Self {
        Self { out, cbc, mac }
    }

    pub fn write_field(&mut self, field_type: u8, data: &[u8]) -> Result<()> {
        let len = i32::try_from(data.len())
            .map_err(|_| Error::invalid_field(field_type, "field too long"))?;
        mac_field(&mut self.mac, field_type, len, data);

        let mut block = [0u8; BLOCK_LEN];
        secure_random(&mut block)?;
        block[..LEN_LEN].copy_from_slice(&len.to_le_bytes());
        block[LEN_LEN] = field_type;
        let first = data.len().min(FIRST_BLOCK_DATA);
        block[LEN_LEN + 1..LEN_LEN + 1 + first].copy_from_slice(&data[..first]);
        let result = self.emit(&mut block).and_then(|_| {
            for chunk in data[first..].chunks(BLOCK_LEN) {
                if chunk.len() < BLOCK_LEN {
                    secure_random(&mut block)?;
                }
                block[..chunk.len()].copy_from_slice(chunk);
                self.emit(&mut block)?;
            }
            Ok(())
        });
        block.zeroize();
        result
    }

    fn emit(&mut self, block: &mut [u8; BLOCK_LEN]) -> Result<()> {
        self.cbc.encrypt_block(block);
        self.out.write_all(block).map_err(Error::WriteFail)
    }

    /// Appends the HMAC trailer and hands back the sink.
    pub fn finish(mut self) -> Result<W> {
        let digest = self.mac.finalize().into_bytes();
        self.out.write_all(&digest).map_err(Error::WriteFail)?;
        self.out.flush().map_err(Error::WriteFail)?;
        Ok(self.out)
    }
}

/// Reads fields until `end`, the offset where the HMAC trailer starts.
pub(crate) struct FieldReader<R: Read> {
    input: R,
    cbc: CbcStream,
    mac: HmacSha256,
    position: u64,
    end: u64,
}

impl<R: Read> FieldReader<R> {
    pub fn new(input: R, cbc: CbcStream, mac: HmacSha256, position: u64, end: u64) -> Self {
        Self {
            input,
            cbc,
            mac,
            position,
            end,
        }
    }

    pub fn at_end(&self) -> bool {
        self.position >= self.end
    }

    fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.position)
    }

    fn next_block(&mut self, block: &mut [u8; BLOCK_LEN]) -> Result<()> {
        self.input.read_exact(block).map_err(Error::from_read)?;
        self.position += BLOCK_LEN as u64;
        self.cbc.decrypt_block(block);
        Ok(())
    }

    /// A length that overruns the record area came out of authenticated
    /// plaintext, so it is reported as an integrity failure.
    pub fn read_field(&mut self) -> Result<RawField> {
        if self.remaining() < BLOCK_LEN as u64 {
            return Err(Error::BadDigest);
        }

        let mut block = [0u8; BLOCK_LEN];
        self.next_block(&mut block)?;

        let mut len_bytes = [0u8; LEN_LEN];
        len_bytes.copy_from_slice(&block[..LEN_LEN]);
        let raw_len = i32::from_le_bytes(len_bytes);
        let field_type = block[LEN_LEN];

        let Ok(len) = usize::try_from(raw_len) else {
            block.zeroize();
            return Err(Error::BadDigest);
        };
        let needed = (encoded_len(len) - BLOCK_LEN) as u64;
        if needed > self.remaining() {
            block.zeroize();
            return Err(Error::BadDigest);
        }

        let mut data = Zeroizing::new(Vec::with_capacity(len));
        let first = len.min(FIRST_BLOCK_DATA);
        data.extend_from_slice(&block[LEN_LEN + 1..LEN_LEN + 1 + first]);
        while data.len() < len {
            self.next_block(&mut block)?;
            let take = (len - data.len()).min(BLOCK_LEN);
            data.extend_from_slice(&block[..take]);
        }
        block.zeroize();

        mac_field(&mut self.mac, field_type, raw_len, &data);
        Ok(RawField { field_type, data })
    }

    /// Reads the trailing digest and compares it with the running HMAC.
    /// Only meaningful once, after the last field.
    pub fn finish(&mut self) -> Result<()> {
        let mut stored = [0u8; HASH_LEN];
        self.input.read_exact(&mut stored).map_err(Error::from_read)?;

        let computed = self.mac.finalize_reset().into_bytes();
        if digests_match(&stored, &computed) {
            Ok(())
        } else {
            Err(Error::BadDigest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hmac;
    use std::io::Cursor;

    const K: [u8; 32] = [0x11; 32];
    const L: [u8; 32] = [0x22; 32];
    const IV: [u8; BLOCK_LEN] = [0x33; BLOCK_LEN];

    fn writer() -> FieldWriter<Vec<u8>> {
        FieldWriter::new(
            Vec::new(),
            CbcStream::new(&K, IV).unwrap(),
            hmac(&L).unwrap(),
        )
    }

    fn reader(buf: &[u8]) -> FieldReader<Cursor<&[u8]>> {
        FieldReader::new(
            Cursor::new(buf),
            CbcStream::new(&K, IV).unwrap(),
            hmac(&L).unwrap(),
            0,
            (buf.len() - HASH_LEN) as u64,
        )
    }

    #[test]
    fn field_sizes_follow_block_layout() {
        assert_eq!(encoded_len(0), 16);
        assert_eq!(encoded_len(11), 16);
        assert_eq!(encoded_len(12), 32);
        assert_eq!(encoded_len(27), 32);
        assert_eq!(encoded_len(28), 48);
    }

    #[test]
    fn fields_of_every_boundary_length_read_back() {
        let lengths = [0usize, 1, 11, 12, 27, 28, 100];
        let mut w = writer();
        for (i, len) in lengths.iter().enumerate() {
            let data: Vec<u8> = (0..*len).map(|b| b as u8).collect();
            w.write_field(i as u8, &data).unwrap();
        }
        let buf = w.finish().unwrap();
        let expected: usize = lengths.iter().map(|l| encoded_len(*l)).sum();
        assert_eq!(buf.len(), expected + HASH_LEN);

        let mut r = reader(&buf);
        for (i, len) in lengths.iter().enumerate() {
            let field = r.read_field().unwrap();
            assert_eq!(field.field_type, i as u8);
            assert_eq!(field.data.len(), *len);
            assert!(field.data.iter().enumerate().all(|(j, b)| *b == j as u8));
        }
        assert!(r.at_end());
        r.finish().unwrap();
    }

    #[test]
    fn flipped_data_byte_fails_digest() {
        let mut w = writer();
        w.write_field(0x05, &[7u8; 60]).unwrap();
        w.write_field(0xff, &[]).unwrap();
        let mut buf = w.finish().unwrap();
        // third block of the first field: data only
        buf[40] ^= 0x01;

        let mut r = reader(&buf);
        r.read_field().unwrap();
        r.read_field().unwrap();
        assert!(matches!(r.finish(), Err(Error::BadDigest)));
    }

    #[test]
    fn overrunning_length_is_an_integrity_failure() {
        let mut w = writer();
        w.write_field(0x03, b"title").unwrap();
        let buf = w.finish().unwrap();

        // pretend the record area ends before the field does
        let mut r = FieldReader::new(
            Cursor::new(&buf[..]),
            CbcStream::new(&K, IV).unwrap(),
            hmac(&L).unwrap(),
            0,
            8,
        );
        assert!(matches!(r.read_field(), Err(Error::BadDigest)));
    }

    #[test]
    fn missing_trailer_is_truncation() {
        let mut w = writer();
        w.write_field(0x03, b"title").unwrap();
        let buf = w.finish().unwrap();
        let cut = &buf[..buf.len() - 10];

        let mut r = FieldReader::new(
            Cursor::new(cut),
            CbcStream::new(&K, IV).unwrap(),
            hmac(&L).unwrap(),
            0,
            16,
        );
        r.read_field().unwrap();
        assert!(matches!(r.finish(), Err(Error::TruncatedFile)));
    }
}
