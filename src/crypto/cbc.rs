use cipher::{BlockDecrypt, BlockEncrypt, generic_array::GenericArray};
use twofish::Twofish;
use zeroize::Zeroize;

use super::{BLOCK_LEN, block_cipher};
use crate::error::Result;

/// Twofish in CBC mode with a chaining value that carries across calls.
///
/// The chain is never reset between fields or records: the whole session is
/// one continuous CBC stream.
pub(crate) struct CbcStream {
    cipher: Twofish,
    chain: [u8; BLOCK_LEN],
}

impl CbcStream {
    pub fn new(key: &[u8], iv: [u8; BLOCK_LEN]) -> Result<Self> {
        Ok(Self {
            cipher: block_cipher(key)?,
            chain: iv,
        })
    }

    pub fn encrypt_block(&mut self, block: &mut [u8; BLOCK_LEN]) {
        xor_in_place(block, &self.chain);
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(block.as_mut_slice()));
        self.chain = *block;
    }

    pub fn decrypt_block(&mut self, block: &mut [u8; BLOCK_LEN]) {
        let ciphertext = *block;
        self.cipher
            .decrypt_block(GenericArray::from_mut_slice(block.as_mut_slice()));
        xor_in_place(block, &self.chain);
        self.chain = ciphertext;
    }
}

impl Drop for CbcStream {
    fn drop(&mut self) {
        self.chain.zeroize();
    }
}

fn xor_in_place(block: &mut [u8; BLOCK_LEN], other: &[u8; BLOCK_LEN]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}
