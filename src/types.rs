//! Core value types shared across the wallet subsystem.
//!
//! `Hash256` is the 32-byte workhorse: block hashes, account public keys,
//! wallet ids, salts, and encrypted key slots are all carried as `Hash256`.
//! The byte order is big-endian when a value is interpreted numerically,
//! matching the on-disk and JSON representations.

use std::fmt;

/// An opaque 32-byte value with big-endian numeric interpretation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

/// Accounts are identified by their ed25519 public key bytes.
pub type Account = Hash256;

/// Wallets are identified by a random 256-bit id.
pub type WalletId = Hash256;

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Construct from a u64, placed in the low-order bytes.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..32].copy_from_slice(&value.to_be_bytes());
        Hash256(bytes)
    }

    /// Construct from a u32, placed in the low-order bytes.
    pub fn from_u32(value: u32) -> Self {
        Hash256::from_u64(value as u64)
    }

    /// The low-order 32 bits of the numeric interpretation.
    pub fn low_u32(&self) -> u32 {
        u32::from_be_bytes([self.0[28], self.0[29], self.0[30], self.0[31]])
    }

    /// The low-order 64 bits of the numeric interpretation.
    pub fn low_u64(&self) -> u64 {
        let mut qword = [0u8; 8];
        qword.copy_from_slice(&self.0[24..32]);
        u64::from_be_bytes(qword)
    }

    /// The value viewed as four big-endian u64 words, most significant first.
    pub fn qwords(&self) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut qword = [0u8; 8];
            qword.copy_from_slice(&self.0[i * 8..(i + 1) * 8]);
            *word = u64::from_be_bytes(qword);
        }
        words
    }

    /// The first 16 bytes (words [0..2)), used as the cipher IV when this
    /// value is a salt.
    pub fn iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&self.0[0..16]);
        iv
    }

    /// Lowercase fixed-width hex, the wire and JSON form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Strict decode: exactly 64 lowercase or uppercase hex characters.
    pub fn from_hex(text: &str) -> Result<Self, HexError> {
        if text.len() != 64 {
            return Err(HexError::Length(text.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(text, &mut bytes).map_err(|_| HexError::Digit)?;
        Ok(Hash256(bytes))
    }
}

/// Errors from `Hash256::from_hex`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("expected 64 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex digit")]
    Digit,
}

impl std::ops::BitXor for Hash256 {
    type Output = Hash256;

    fn bitxor(self, rhs: Hash256) -> Hash256 {
        let mut out = [0u8; 32];
        for (o, (a, b)) in out.iter_mut().zip(self.0.iter().zip(rhs.0.iter())) {
            *o = a ^ b;
        }
        Hash256(out)
    }
}

impl std::ops::BitXorAssign for Hash256 {
    fn bitxor_assign(&mut self, rhs: Hash256) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a ^= b;
        }
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

impl serde::Serialize for Hash256 {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Hash256 {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        // Validate on deserialization so malformed hex never becomes a value.
        let text: String = serde::Deserialize::deserialize(d)?;
        Hash256::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
