//! The 32-byte slot transform.
//!
//! Every encrypted value in a wallet table — the wallet-key envelope, the
//! password check sentinel, the seed, and ad-hoc private keys — is a single
//! 32-byte slot run through AES-256-CTR. The IV is the low 16 bytes of the
//! wallet salt, so encryption and decryption are the same keystream XOR and
//! the transform is length-preserving by construction.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::crypto::keys::RawKey;
use crate::types::Hash256;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

fn apply(block: &mut [u8; 32], key: &RawKey, iv: &[u8; 16]) {
    let mut cipher = Aes256Ctr::new(key.as_bytes().into(), iv.into());
    cipher.apply_keystream(block);
}

/// Encrypt a 32-byte secret into a storable slot value.
pub fn encrypt(plaintext: &RawKey, key: &RawKey, iv: &[u8; 16]) -> Hash256 {
    let mut block = *plaintext.as_bytes();
    apply(&mut block, key, iv);
    Hash256(block)
}

/// Decrypt a stored slot value back into a 32-byte secret.
pub fn decrypt(ciphertext: &Hash256, key: &RawKey, iv: &[u8; 16]) -> RawKey {
    let mut block = *ciphertext.as_bytes();
    apply(&mut block, key, iv);
    RawKey::from_bytes(block)
}
