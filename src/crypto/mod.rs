//! Cryptographic primitives for the container.
//!
//! Provides key stretching, key wrapping, key blocks, and the Twofish/HMAC
//! building blocks shared by the field codec and the attachment codec.

pub(crate) mod cbc;
pub mod kdf;
pub mod keyblock;
pub mod keywrap;

pub use kdf::{
    DEFAULT_HASH_ITERATIONS, KdfParams, MAX_HASH_ITERATIONS, MIN_HASH_ITERATIONS, stretch_key,
};
pub use keyblock::{KeyBlock, KeyBlockSet, SessionKeys};
pub use keywrap::KeyWrap;

use cipher::KeyInit;
use getrandom::fill;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use twofish::Twofish;

use crate::error::{Error, Result};

/// Length of a key-block salt (32 bytes).
pub const SALT_LEN: usize = 32;
/// Length of the session keys K and L (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of a wrapped session key (key + 8-byte integrity block).
pub const WRAPPED_LEN: usize = KEY_LEN + 8;
/// Length of SHA-256 / HMAC-SHA256 output.
pub const HASH_LEN: usize = 32;
/// Length of the per-session nonce.
pub const NONCE_LEN: usize = 32;
/// Cipher block size (Twofish).
pub const BLOCK_LEN: usize = 16;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Error::Random)
}

/// Random bytes passed through SHA-256 so raw RNG output never lands on disk.
pub(crate) fn hashed_random() -> Result<[u8; HASH_LEN]> {
    let mut raw = [0u8; HASH_LEN];
    secure_random(&mut raw)?;
    Ok(sha256(&raw))
}

pub(crate) fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

pub(crate) fn hmac(key: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)
}

pub(crate) fn block_cipher(key: &[u8]) -> Result<Twofish> {
    Twofish::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)
}

pub(crate) fn digests_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_random_differs_between_calls() {
        assert_ne!(hashed_random().unwrap(), hashed_random().unwrap());
    }

    #[test]
    fn twofish_accepts_256_bit_keys_only_here() {
        assert!(block_cipher(&[0u8; KEY_LEN]).is_ok());
        assert!(matches!(block_cipher(&[0u8; 7]), Err(Error::InvalidKeyLength)));
    }

    #[test]
    fn digest_comparison() {
        assert!(digests_match(&[1, 2, 3], &[1, 2, 3]));
        assert!(!digests_match(&[1, 2, 3], &[1, 2, 4]));
        assert!(!digests_match(&[1, 2, 3], &[1, 2]));
    }
}
