//! RFC 3394 key wrap, generalized to any cipher with 128-bit blocks.
//!
//! Six passes over the payload in 64-bit halves; the recovered integrity
//! block tells a wrong wrapping key apart from a good one without touching
//! any real data.

use cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser, consts::U16, generic_array::GenericArray};
use zeroize::{Zeroize, Zeroizing};

use super::{KEY_LEN, WRAPPED_LEN, digests_match};

const INTEGRITY_IV: [u8; 8] = [0xA6; 8];
const ROUNDS: usize = 6;
const HALVES: usize = KEY_LEN / 8;

pub struct KeyWrap<'a, C> {
    cipher: &'a C,
}

impl<'a, C> KeyWrap<'a, C>
where
    C: BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16>,
{
    pub fn new(cipher: &'a C) -> Self {
        Self { cipher }
    }

    pub fn wrap(&self, key: &[u8; KEY_LEN]) -> [u8; WRAPPED_LEN] {
        let mut a = INTEGRITY_IV;
        let mut r = Zeroizing::new(*key);
        let mut block = GenericArray::<u8, U16>::default();

        for j in 0..ROUNDS {
            for i in 0..HALVES {
                block[..8].copy_from_slice(&a);
                block[8..].copy_from_slice(&r[i * 8..i * 8 + 8]);
                self.cipher.encrypt_block(&mut block);

                a.copy_from_slice(&block[..8]);
                xor_counter(&mut a, HALVES * j + i + 1);
                r[i * 8..i * 8 + 8].copy_from_slice(&block[8..]);
            }
        }
        block.as_mut_slice().zeroize();

        let mut wrapped = [0u8; WRAPPED_LEN];
        wrapped[..8].copy_from_slice(&a);
        wrapped[8..].copy_from_slice(r.as_ref());
        wrapped
    }

    /// Returns `None` when the integrity block does not come back intact.
    pub fn unwrap(&self, wrapped: &[u8; WRAPPED_LEN]) -> Option<Zeroizing<[u8; KEY_LEN]>> {
        let mut a = [0u8; 8];
        a.copy_from_slice(&wrapped[..8]);
        let mut r = Zeroizing::new([0u8; KEY_LEN]);
        r.copy_from_slice(&wrapped[8..]);
        let mut block = GenericArray::<u8, U16>::default();

        for j in (0..ROUNDS).rev() {
            for i in (0..HALVES).rev() {
                xor_counter(&mut a, HALVES * j + i + 1);
                block[..8].copy_from_slice(&a);
                block[8..].copy_from_slice(&r[i * 8..i * 8 + 8]);
                self.cipher.decrypt_block(&mut block);

                a.copy_from_slice(&block[..8]);
                r[i * 8..i * 8 + 8].copy_from_slice(&block[8..]);
            }
        }
        block.as_mut_slice().zeroize();

        if digests_match(&a, &INTEGRITY_IV) {
            Some(r)
        } else {
            None
        }
    }
}

fn xor_counter(a: &mut [u8; 8], t: usize) {
    for (x, y) in a.iter_mut().zip((t as u64).to_be_bytes()) {
        *x ^= y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::block_cipher;
    use aes::Aes256;
    use cipher::KeyInit;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn aes_256_matches_rfc3394_vector() {
        let kek = hex("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F");
        let key: [u8; 32] = hex("00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F")
            .try_into()
            .unwrap();
        let expected = hex(
            "28C9F404C4B810F4CBCCB35CFB87F8263F5786E2D80ED326CBC7F0E71A99F43BFB988B9B7A02DD21",
        );

        let aes = Aes256::new_from_slice(&kek).unwrap();
        let kw = KeyWrap::new(&aes);

        let wrapped = kw.wrap(&key);
        assert_eq!(wrapped.to_vec(), expected);
        assert_eq!(*kw.unwrap(&wrapped).unwrap(), key);
    }

    #[test]
    fn twofish_unwraps_what_it_wrapped() {
        let fish = block_cipher(&[9u8; 32]).unwrap();
        let kw = KeyWrap::new(&fish);
        let key = [0x5Au8; 32];

        let wrapped = kw.wrap(&key);
        assert_ne!(&wrapped[8..], &key[..]);
        assert_eq!(*kw.unwrap(&wrapped).unwrap(), key);
    }

    #[test]
    fn wrong_wrapping_key_is_detected() {
        let good = block_cipher(&[1u8; 32]).unwrap();
        let bad = block_cipher(&[2u8; 32]).unwrap();

        let wrapped = KeyWrap::new(&good).wrap(&[3u8; 32]);
        assert!(KeyWrap::new(&bad).unwrap(&wrapped).is_none());
    }

    #[test]
    fn corrupted_wrap_is_detected() {
        let fish = block_cipher(&[1u8; 32]).unwrap();
        let kw = KeyWrap::new(&fish);

        let mut wrapped = kw.wrap(&[3u8; 32]);
        wrapped[20] ^= 0x01;
        assert!(kw.unwrap(&wrapped).is_none());
    }
}
