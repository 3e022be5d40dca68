//! Key blocks: independently passphrase-unlockable wrappings of the
//! session keys K and L.
//!
//! On-disk section:
//! ```text
//! NONCE (32) | { SALT (32) | ITERATIONS (4, le) | WRAPPED_K (40) | WRAPPED_L (40) }+ | SHA256(NONCE) (32) | END_KB (32)
//! ```

use std::fmt;
use std::io::{Read, Write};

use hmac::Mac;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::{KdfParams, check_iterations, stretch_key};
use super::keywrap::KeyWrap;
use super::{
    HASH_LEN, HmacSha256, KEY_LEN, NONCE_LEN, SALT_LEN, WRAPPED_LEN, block_cipher, digests_match,
    hashed_random, hmac, secure_random, sha256,
};
use crate::error::{Error, Result};

const ITER_LEN: usize = 4;
/// Length of one serialized key block.
pub const KEY_BLOCK_LEN: usize = SALT_LEN + ITER_LEN + 2 * WRAPPED_LEN;

/// K encrypts fields, L keys every HMAC. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    k: [u8; KEY_LEN],
    l: [u8; KEY_LEN],
}

impl SessionKeys {
    pub(crate) fn generate() -> Result<Self> {
        let mut keys = Self {
            k: [0u8; KEY_LEN],
            l: [0u8; KEY_LEN],
        };
        secure_random(&mut keys.k)?;
        secure_random(&mut keys.l)?;
        Ok(keys)
    }

    pub fn encryption_key(&self) -> &[u8; KEY_LEN] {
        &self.k
    }

    pub fn hmac_key(&self) -> &[u8; KEY_LEN] {
        &self.l
    }
}

impl PartialEq for SessionKeys {
    fn eq(&self, other: &Self) -> bool {
        digests_match(&self.k, &other.k) & digests_match(&self.l, &other.l)
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("k", &"[REDACTED]")
            .field("l", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    salt: [u8; SALT_LEN],
    iterations: u32,
    wrapped_k: [u8; WRAPPED_LEN],
    wrapped_l: [u8; WRAPPED_LEN],
}

impl KeyBlock {
    /// Wraps `keys` under a key stretched from `passphrase` and a fresh salt.
    pub fn seal(keys: &SessionKeys, passphrase: &str, kdf: KdfParams) -> Result<Self> {
        kdf.validate()?;

        let salt = hashed_random()?;
        let ptag = stretch_key(passphrase, &salt, kdf.iterations())?;
        let fish = block_cipher(ptag.as_ref())?;
        let kw = KeyWrap::new(&fish);

        Ok(Self {
            salt,
            iterations: kdf.iterations(),
            wrapped_k: kw.wrap(&keys.k),
            wrapped_l: kw.wrap(&keys.l),
        })
    }

    /// Returns `Ok(None)` when `passphrase` does not unlock this block.
    pub fn open(&self, passphrase: &str) -> Result<Option<SessionKeys>> {
        let ptag = stretch_key(passphrase, &self.salt, self.iterations)?;
        let fish = block_cipher(ptag.as_ref())?;
        let kw = KeyWrap::new(&fish);

        let Some(k) = kw.unwrap(&self.wrapped_k) else {
            return Ok(None);
        };
        let Some(l) = kw.unwrap(&self.wrapped_l) else {
            warn!("key block unwrapped K but not L");
            return Ok(None);
        };

        Ok(Some(SessionKeys { k: *k, l: *l }))
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn to_bytes(&self) -> [u8; KEY_BLOCK_LEN] {
        let mut buf = [0u8; KEY_BLOCK_LEN];
        let mut offset = 0;

        buf[offset..offset + SALT_LEN].copy_from_slice(&self.salt);
        offset += SALT_LEN;
        buf[offset..offset + ITER_LEN].copy_from_slice(&self.iterations.to_le_bytes());
        offset += ITER_LEN;
        buf[offset..offset + WRAPPED_LEN].copy_from_slice(&self.wrapped_k);
        offset += WRAPPED_LEN;
        buf[offset..].copy_from_slice(&self.wrapped_l);

        buf
    }

    pub fn from_bytes(data: &[u8; KEY_BLOCK_LEN]) -> Self {
        let mut salt = [0u8; SALT_LEN];
        let mut iterations = [0u8; ITER_LEN];
        let mut wrapped_k = [0u8; WRAPPED_LEN];
        let mut wrapped_l = [0u8; WRAPPED_LEN];

        let (s, rest) = data.split_at(SALT_LEN);
        let (n, rest) = rest.split_at(ITER_LEN);
        let (wk, wl) = rest.split_at(WRAPPED_LEN);
        salt.copy_from_slice(s);
        iterations.copy_from_slice(n);
        wrapped_k.copy_from_slice(wk);
        wrapped_l.copy_from_slice(wl);

        Self {
            salt,
            iterations: u32::from_le_bytes(iterations),
            wrapped_k,
            wrapped_l,
        }
    }
}

/// Ordered key blocks that all wrap the same K and L.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBlockSet {
    blocks: Vec<KeyBlock>,
}

impl KeyBlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-block set around freshly generated session keys.
    pub fn create(passphrase: &str, kdf: KdfParams) -> Result<(Self, SessionKeys)> {
        let mut set = Self::new();
        let keys = set.add_block(None, passphrase, kdf)?;
        Ok((set, keys))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyBlock> {
        self.blocks.iter()
    }

    /// Tries every block in order; `Ok(None)` means no block matched.
    ///
    /// A block whose stored iteration count is outside the accepted range
    /// never matches and is skipped without running the KDF.
    pub fn try_unlock(&self, passphrase: &str) -> Result<Option<(usize, SessionKeys)>> {
        for (index, block) in self.blocks.iter().enumerate() {
            if check_iterations(block.iterations).is_err() {
                warn!(index, iterations = block.iterations, "skipping unusable key block");
                continue;
            }
            if let Some(keys) = block.open(passphrase)? {
                debug!(index, "key block unlocked");
                return Ok(Some((index, keys)));
            }
        }
        Ok(None)
    }

    /// Like [`try_unlock`](Self::try_unlock) but a miss is `WrongPassword`.
    pub fn unlock(&self, passphrase: &str) -> Result<(usize, SessionKeys)> {
        self.try_unlock(passphrase)?.ok_or(Error::WrongPassword)
    }

    /// Appends a block for `new_passphrase`.
    ///
    /// An empty set gets fresh session keys. Otherwise `existing` must
    /// unlock a current block, and the recovered K and L are wrapped again.
    pub fn add_block(
        &mut self,
        existing: Option<&str>,
        new_passphrase: &str,
        kdf: KdfParams,
    ) -> Result<SessionKeys> {
        kdf.validate()?;

        let keys = if self.blocks.is_empty() {
            SessionKeys::generate()?
        } else {
            let existing = existing.ok_or(Error::WrongPassword)?;
            self.unlock(existing)?.1
        };

        self.blocks.push(KeyBlock::seal(&keys, new_passphrase, kdf)?);
        debug!(blocks = self.blocks.len(), "key block added");
        Ok(keys)
    }

    /// Drops the first block `passphrase` unlocks. The last block stays.
    pub fn remove_block(&mut self, passphrase: &str) -> Result<()> {
        if self.blocks.len() <= 1 {
            return Err(Error::LastKeyBlock);
        }

        let (index, _) = self.unlock(passphrase)?;
        self.blocks.remove(index);
        debug!(blocks = self.blocks.len(), "key block removed");
        Ok(())
    }

    /// Replaces the block `old` unlocks with one for `new`; K and L are kept.
    pub fn change_passphrase(&mut self, old: &str, new: &str, kdf: KdfParams) -> Result<()> {
        let (index, keys) = self.unlock(old)?;
        self.blocks[index] = KeyBlock::seal(&keys, new, kdf)?;
        Ok(())
    }

    /// Re-seals the block `passphrase` unlocks with a new salt and `kdf`.
    pub fn rekey(&mut self, passphrase: &str, kdf: KdfParams) -> Result<()> {
        self.change_passphrase(passphrase, passphrase, kdf)
    }

    /// HMAC(L) over every serialized block followed by `SHA256(nonce)`.
    pub(crate) fn end_digest(
        &self,
        nonce_hash: &[u8; HASH_LEN],
        keys: &SessionKeys,
    ) -> Result<[u8; HASH_LEN]> {
        let mut mac: HmacSha256 = hmac(keys.hmac_key())?;
        for block in &self.blocks {
            mac.update(&block.to_bytes());
        }
        mac.update(nonce_hash);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Writes the whole key-block section under a fresh nonce.
    pub(crate) fn write_section<W: Write>(&self, out: &mut W, keys: &SessionKeys) -> Result<()> {
        let mut nonce = [0u8; NONCE_LEN];
        secure_random(&mut nonce)?;
        let nonce_hash = sha256(&nonce);
        let end_kb = self.end_digest(&nonce_hash, keys)?;

        out.write_all(&nonce).map_err(Error::WriteFail)?;
        for block in &self.blocks {
            out.write_all(&block.to_bytes()).map_err(Error::WriteFail)?;
        }
        out.write_all(&nonce_hash).map_err(Error::WriteFail)?;
        out.write_all(&end_kb).map_err(Error::WriteFail)?;
        Ok(())
    }

    /// Reads the nonce and key blocks up to the nonce-hash sentinel.
    ///
    /// Returns the set and the sentinel; the end digest that follows is
    /// left in the stream for [`verify_end_digest`](Self::verify_end_digest).
    pub(crate) fn read_section<R: Read>(input: &mut R) -> Result<(Self, [u8; HASH_LEN])> {
        let mut nonce = [0u8; NONCE_LEN];
        input.read_exact(&mut nonce).map_err(Error::from_read)?;
        let sentinel = sha256(&nonce);

        let mut set = Self::new();
        loop {
            let mut buf = [0u8; KEY_BLOCK_LEN];
            input
                .read_exact(&mut buf[..HASH_LEN])
                .map_err(Error::from_read)?;
            if buf[..HASH_LEN] == sentinel {
                break;
            }
            input
                .read_exact(&mut buf[HASH_LEN..])
                .map_err(Error::from_read)?;
            set.blocks.push(KeyBlock::from_bytes(&buf));
        }

        debug!(blocks = set.blocks.len(), "parsed key blocks");
        Ok((set, sentinel))
    }

    pub(crate) fn verify_end_digest<R: Read>(
        &self,
        input: &mut R,
        sentinel: &[u8; HASH_LEN],
        keys: &SessionKeys,
    ) -> Result<()> {
        let mut stored = [0u8; HASH_LEN];
        input.read_exact(&mut stored).map_err(Error::from_read)?;

        if digests_match(&stored, &self.end_digest(sentinel, keys)?) {
            Ok(())
        } else {
            Err(Error::BadDigest)
        }
    }
}
