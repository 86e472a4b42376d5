//! Cryptographic building blocks for the wallet subsystem: password
//! derivation, the 32-byte slot cipher, and key material handling.

pub mod cipher;
pub mod kdf;
pub mod keys;

use rand::RngCore;

/// Fill a buffer from the process CSPRNG.
///
/// Used for salts, wallet master keys, seeds, and RNG seeding in the work
/// pool. `rand::rng()` is a ChaCha-based generator reseeded from the OS.
pub fn random_bytes(buf: &mut [u8]) {
    rand::rng().fill_bytes(buf);
}

/// A random 256-bit value, for wallet ids and salts.
pub fn random_hash() -> crate::types::Hash256 {
    let mut bytes = [0u8; 32];
    random_bytes(&mut bytes);
    crate::types::Hash256(bytes)
}
