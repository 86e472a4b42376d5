//! Password-to-key derivation.
//!
//! Argon2i with a single pass, parallelism 1, and a network-dependent
//! memory cost: the production network uses 64 MiB, the test network a
//! minimal cost so unit tests stay fast. Derivation is serialized behind a
//! mutex so concurrent wallet operations cannot multiply the memory cost.

use std::sync::Mutex;

use argon2::{Algorithm, Argon2, Params, Version};

use crate::constants;
use crate::crypto::keys::RawKey;
use crate::types::Hash256;

/// Shared key-derivation context. One instance serves every wallet in the
/// node; cloning the `Arc` it lives in shares the serialization mutex.
pub struct Kdf {
    mutex: Mutex<()>,
}

impl Kdf {
    pub fn new() -> Self {
        Kdf {
            mutex: Mutex::new(()),
        }
    }

    /// Derive a 256-bit key from a password and the wallet salt.
    ///
    /// Only ever fails on invalid Argon2 parameters, which is a programming
    /// error rather than a runtime condition.
    pub fn derive(&self, password: &str, salt: &Hash256) -> RawKey {
        let _guard = self.mutex.lock().expect("kdf mutex poisoned");
        let params = Params::new(constants::KDF_MEMORY_KIB, 1, 1, Some(32))
            .expect("valid Argon2 params");
        let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);
        let mut output = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut output)
            .expect("Argon2 derivation failed");
        RawKey::from_bytes(output)
    }
}

impl Default for Kdf {
    fn default() -> Self {
        Kdf::new()
    }
}
