//! # Vireo wallet subsystem
//!
//! The security- and concurrency-sensitive core of the Vireo node:
//! - **Encrypted keystore** — ed25519 private keys, deterministic and
//!   imported, persisted under a user password in a transactional
//!   key-value store
//! - **Password lifecycle** — Argon2i derivation, rekey, locked/unlocked
//!   state, format version upgrades
//! - **Work pool** — multi-threaded Blake2b proof-of-work nonce search
//!   with cooperative cancellation and optional hardware offload
//! - **Action coordinator** — per-account serialized, priority-ordered
//!   wallet operations with cached-work maintenance
//!
//! The surrounding node — ledger, consensus, networking — is consumed
//! through the traits in [`ledger`].

pub mod crypto;
pub mod keystore;
pub mod ledger;
pub mod store;
pub mod types;
pub mod wallet;
pub mod work;

/// Network constants.
///
/// The test network trades security margins for unit-test speed: a single
/// work thread, a permissive work threshold, and a minimal Argon2 memory
/// cost. Production values match the public network.
pub mod constants {
    /// A nonce is valid iff the 8-byte Blake2b digest of `nonce ‖ root`,
    /// read little-endian, is strictly below this threshold.
    pub const WORK_THRESHOLD: u64 = if cfg!(test) {
        // ~1 in 2^16 nonces validate; solving takes milliseconds.
        0x0001_0000_0000_0000
    } else {
        // ~1 in 2^26 nonces validate.
        0x0000_0040_0000_0000
    };

    /// Argon2i memory cost in KiB for password derivation.
    pub const KDF_MEMORY_KIB: u32 = if cfg!(test) { 8 } else { 64 * 1024 };

    /// Default XOR-share count for the in-memory password cache.
    pub const DEFAULT_PASSWORD_FANOUT: usize = 1024;
}
