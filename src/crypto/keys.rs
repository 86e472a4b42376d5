//! Key material handling: 32-byte secrets, ed25519 derivation and signing,
//! and the XOR-share obfuscation used for the in-memory password cache.
//!
//! Secrets live in fixed-size buffers and are zeroized on drop; they never
//! pass through growable containers.

use std::fmt;
use std::sync::Mutex;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{Account, Hash256};

pub use ed25519_dalek::Signature;

/// A 32-byte secret: a seed, a password-derived key, a wallet master key,
/// or an ed25519 private key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RawKey([u8; 32]);

impl RawKey {
    pub fn zero() -> Self {
        RawKey([0u8; 32])
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        super::random_bytes(&mut bytes);
        RawKey(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        RawKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The ed25519 public key for this private key, as account bytes.
    pub fn public_key(&self) -> Account {
        let signing = SigningKey::from_bytes(&self.0);
        Hash256(signing.verifying_key().to_bytes())
    }

    /// Produce a detached ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signing = SigningKey::from_bytes(&self.0);
        signing.sign(message)
    }
}

impl PartialEq for RawKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for RawKey {}

impl std::ops::BitXorAssign<&RawKey> for RawKey {
    fn bitxor_assign(&mut self, rhs: &RawKey) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a ^= b;
        }
    }
}

impl fmt::Debug for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawKey(..)")
    }
}

/// Verify a detached signature against account public-key bytes.
///
/// Returns false for malformed public keys as well as bad signatures.
pub fn verify(account: &Account, message: &[u8], signature: &Signature) -> bool {
    match VerifyingKey::from_bytes(account.as_bytes()) {
        Ok(key) => key.verify(message, signature).is_ok(),
        Err(_) => false,
    }
}

/// XOR-share obfuscation of a cached secret.
///
/// The secret is split across `fanout` 256-bit slots whose XOR is the
/// value; no single slot holds the key, which resists single-point memory
/// disclosure. Reads and writes take the internal mutex.
pub struct Fan {
    values: Mutex<Vec<RawKey>>,
}

impl Fan {
    pub fn new(key: RawKey, fanout: usize) -> Self {
        let mut values = Vec::with_capacity(fanout.max(1));
        values.push(key);
        for _ in 1..fanout.max(1) {
            let entry = RawKey::random();
            let mut head = values[0].clone();
            head ^= &entry;
            values[0] = head;
            values.push(entry);
        }
        Fan {
            values: Mutex::new(values),
        }
    }

    /// Reassemble the cached value.
    pub fn value(&self) -> RawKey {
        let guard = self.values.lock().expect("fan mutex poisoned");
        Self::assemble(&guard)
    }

    /// Replace the cached value, leaving the share layout intact.
    pub fn value_set(&self, new: RawKey) {
        let mut guard = self.values.lock().expect("fan mutex poisoned");
        let current = Self::assemble(&guard);
        let mut head = guard[0].clone();
        head ^= &current;
        head ^= &new;
        guard[0] = head;
    }

    fn assemble(values: &[RawKey]) -> RawKey {
        let mut out = RawKey::zero();
        for value in values {
            out ^= value;
        }
        out
    }
}
