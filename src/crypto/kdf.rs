use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::KEY_LEN;
use crate::error::{Error, Result};

/// Lowest PBKDF2 iteration count accepted on read or write.
pub const MIN_HASH_ITERATIONS: u32 = 2048;
/// Highest iteration count accepted; a stored count above it is treated as
/// a block that does not match rather than run to completion.
pub const MAX_HASH_ITERATIONS: u32 = 1 << 22;
/// Iteration count used for new key blocks.
pub const DEFAULT_HASH_ITERATIONS: u32 = 262_144;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_HASH_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn validate(&self) -> Result<()> {
        check_iterations(self.iterations)
    }
}

pub(crate) fn check_iterations(iterations: u32) -> Result<()> {
    if iterations < MIN_HASH_ITERATIONS {
        return Err(Error::WeakIterations {
            found: iterations,
            minimum: MIN_HASH_ITERATIONS,
        });
    }
    if iterations > MAX_HASH_ITERATIONS {
        return Err(Error::ExcessiveIterations {
            found: iterations,
            maximum: MAX_HASH_ITERATIONS,
        });
    }
    Ok(())
}

/// Stretches a passphrase into the key that wraps K and L.
///
/// PBKDF2 with HMAC-SHA256 as PRF. The output is only ever used to key the
/// wrapping cipher, never directly on data.
pub fn stretch_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    check_iterations(iterations)?;

    let mut ptag = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, ptag.as_mut());
    Ok(ptag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stretch_is_deterministic() {
        let salt = [42u8; 32];

        let k1 = stretch_key("password", &salt, MIN_HASH_ITERATIONS).unwrap();
        let k2 = stretch_key("password", &salt, MIN_HASH_ITERATIONS).unwrap();

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn iterations_affect_output() {
        let salt = [7u8; 32];

        let k1 = stretch_key("pw", &salt, MIN_HASH_ITERATIONS).unwrap();
        let k2 = stretch_key("pw", &salt, MIN_HASH_ITERATIONS + 1).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn salt_affects_output() {
        let k1 = stretch_key("pw", &[1u8; 32], MIN_HASH_ITERATIONS).unwrap();
        let k2 = stretch_key("pw", &[2u8; 32], MIN_HASH_ITERATIONS).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn matches_pbkdf2_sha256_vector() {
        let expected = [
            0xc5, 0xe4, 0x78, 0xd5, 0x92, 0x88, 0xc8, 0x41, 0xaa, 0x53, 0x0d, 0xb6, 0x84, 0x5c,
            0x4c, 0x8d, 0x96, 0x28, 0x93, 0xa0, 0x01, 0xce, 0x4e, 0x11, 0xa4, 0x96, 0x38, 0x73,
            0xaa, 0x98, 0x13, 0x4a,
        ];

        let ptag = stretch_key("password", b"salt", 4096).unwrap();
        assert_eq!(*ptag, expected);
    }

    #[test]
    fn weak_iterations_are_rejected() {
        let err = stretch_key("pw", &[0u8; 32], MIN_HASH_ITERATIONS - 1).unwrap_err();
        assert!(matches!(
            err,
            Error::WeakIterations {
                found: 2047,
                minimum: MIN_HASH_ITERATIONS
            }
        ));
        assert!(KdfParams::new(1).is_err());
        assert_eq!(KdfParams::new(100_000).unwrap().iterations(), 100_000);
    }

    #[test]
    fn excessive_iterations_are_rejected() {
        assert!(KdfParams::new(MAX_HASH_ITERATIONS).is_ok());
        assert!(matches!(
            KdfParams::new(MAX_HASH_ITERATIONS + 1),
            Err(Error::ExcessiveIterations {
                maximum: MAX_HASH_ITERATIONS,
                ..
            })
        ));
        assert!(matches!(
            stretch_key("pw", &[0u8; 32], u32::MAX),
            Err(Error::ExcessiveIterations { .. })
        ));
    }
}
