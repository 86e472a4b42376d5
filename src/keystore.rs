//! Encrypted per-wallet key database.
//!
//! Each wallet is one table in the backing store, keyed by `Hash256`. Keys
//! 0–6 are reserved for the wallet's own metadata (version, salt, encrypted
//! wallet master key, password check sentinel, representative, encrypted
//! seed, deterministic index); user entries live at their ed25519 public
//! key, which is numerically always ≥ 7.
//!
//! Every record is a fixed 40-byte [`WalletEntry`]: a 32-byte value slot
//! plus a cached 8-byte work nonce. The value slot is polymorphic — for
//! ad-hoc keys it is the AES-CTR ciphertext of the private key under the
//! wallet master key, for deterministic keys it is the marker
//! `(1 << 32) | index` naming a position on the seed chain.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use subtle::ConstantTimeEq;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::crypto::cipher;
use crate::crypto::kdf::Kdf;
use crate::crypto::keys::{Fan, RawKey};
use crate::store::{ReadTxn, Store, StoreError, WriteTxn};
use crate::types::{Account, Hash256};

type Blake2b256 = Blake2b<U32>;

const fn special(low: u8) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[31] = low;
    Hash256(bytes)
}

/// Wallet format version number.
const VERSION_SPECIAL: Hash256 = special(0);
/// Random salt for private key encryption and password derivation.
const SALT_SPECIAL: Hash256 = special(1);
/// Wallet master key, encrypted under the password-derived key.
const WALLET_KEY_SPECIAL: Hash256 = special(2);
/// Check value used to validate a password without retaining it.
const CHECK_SPECIAL: Hash256 = special(3);
/// Representative account used when opening new accounts.
const REPRESENTATIVE_SPECIAL: Hash256 = special(4);
/// Wallet seed for deterministic key generation, encrypted.
const SEED_SPECIAL: Hash256 = special(5);
/// Next index on the deterministic key chain.
const DETERMINISTIC_INDEX_SPECIAL: Hash256 = special(6);
/// First non-reserved key; user-facing iteration starts here.
const SPECIAL_COUNT: Hash256 = special(7);

const VERSION_1: u32 = 1;
const VERSION_2: u32 = 2;
const VERSION_3: u32 = 3;
const VERSION_CURRENT: u32 = VERSION_3;

/// Errors from keystore operations.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("wallet is locked or the password is invalid")]
    InvalidPassword,
    #[error("entry produced a key with a mismatched public key")]
    InvalidKey,
    #[error("no entry for the requested key")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed wallet JSON: {0}")]
    MalformedInput(String),
    #[error("I/O error: {0}")]
    Io(String),
}

/// A fixed 40-byte wallet record: 32-byte value slot plus cached work nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletEntry {
    pub key: Hash256,
    pub work: u64,
}

impl WalletEntry {
    pub fn new(key: Hash256) -> Self {
        WalletEntry { key, work: 0 }
    }

    pub fn to_bytes(&self) -> [u8; 40] {
        let mut bytes = [0u8; 40];
        bytes[0..32].copy_from_slice(self.key.as_bytes());
        bytes[32..40].copy_from_slice(&self.work.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != 40 {
            return Err(StoreError::Corrupt("wallet entry is not 40 bytes"));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[0..32]);
        let mut work = [0u8; 8];
        work.copy_from_slice(&bytes[32..40]);
        Ok(WalletEntry {
            key: Hash256(key),
            work: u64::from_le_bytes(work),
        })
    }
}

/// Classification of a user entry's value slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    /// Ciphertext of an externally supplied private key.
    Adhoc,
    /// Marker naming an index on the deterministic seed chain.
    Deterministic,
    /// Neither; fetching such an entry is an error.
    Unknown,
}

/// Classify a value slot by its big-endian numeric magnitude.
///
/// Values strictly above 2^64 are ciphertext: the AES-CTR encryption of a
/// random 256-bit key has its high 192 bits all zero with probability
/// ~2^-192, so the convention is probabilistic but statistically certain.
/// Values of the form `(1 << 32) | index` are deterministic markers.
/// Everything else — including exactly 2^64 — is unknown.
pub fn key_type(entry: &WalletEntry) -> KeyType {
    let bytes = entry.key.as_bytes();
    let high = &bytes[0..24];
    if high.iter().any(|&b| b != 0) {
        let exactly_two_pow_64 = high[23] == 1
            && high[..23].iter().all(|&b| b == 0)
            && bytes[24..].iter().all(|&b| b == 0);
        if exactly_two_pow_64 {
            KeyType::Unknown
        } else {
            KeyType::Adhoc
        }
    } else if bytes[24..28] == [0, 0, 0, 1] {
        KeyType::Deterministic
    } else {
        KeyType::Unknown
    }
}

/// An encrypted, versioned key database for one wallet.
pub struct Keystore {
    table: crate::store::Table,
    name: String,
    store: Arc<Store>,
    kdf: Arc<Kdf>,
    password: Fan,
}

impl Keystore {
    /// Open a wallet table, materializing the seven special entries if the
    /// table is new. Fresh wallets get a random salt, master key, and seed,
    /// and a zero cached password (they are born unlocked).
    pub fn open_or_create(
        txn: &WriteTxn<'_>,
        store: Arc<Store>,
        kdf: Arc<Kdf>,
        representative: Account,
        fanout: usize,
        name: &str,
    ) -> Result<Self, KeystoreError> {
        let table = store.table(name)?;
        let keystore = Keystore {
            table,
            name: name.to_string(),
            store,
            kdf,
            password: Fan::new(RawKey::zero(), fanout),
        };
        if keystore.entry_get_raw(txn, &VERSION_SPECIAL)?.is_none() {
            keystore.version_put(txn, VERSION_CURRENT)?;
            let salt = crate::crypto::random_hash();
            keystore.entry_put_raw(txn, &SALT_SPECIAL, &WalletEntry::new(salt))?;
            // The wallet master key is a fixed random key that encrypts all
            // entries; it is itself encrypted under the user's password.
            let wallet_master = RawKey::random();
            let zero = RawKey::zero();
            let envelope = cipher::encrypt(&wallet_master, &zero, &salt.iv());
            keystore.entry_put_raw(txn, &WALLET_KEY_SPECIAL, &WalletEntry::new(envelope))?;
            let check = cipher::encrypt(&zero, &wallet_master, &salt.iv());
            keystore.entry_put_raw(txn, &CHECK_SPECIAL, &WalletEntry::new(check))?;
            keystore.entry_put_raw(
                txn,
                &REPRESENTATIVE_SPECIAL,
                &WalletEntry::new(representative),
            )?;
            let seed = RawKey::random();
            keystore.seed_set(txn, &seed)?;
        }
        Ok(keystore)
    }

    /// Build a wallet table from a JSON export: `{hex key → hex slot}`.
    ///
    /// Strict: every key and value must be exactly 64 hex characters, and
    /// the version, wallet key, salt, check, and representative specials
    /// must all be present once loading finishes.
    pub fn load_json(
        txn: &WriteTxn<'_>,
        store: Arc<Store>,
        kdf: Arc<Kdf>,
        fanout: usize,
        name: &str,
        json: &str,
    ) -> Result<Self, KeystoreError> {
        let table = store.table(name)?;
        let keystore = Keystore {
            table,
            name: name.to_string(),
            store,
            kdf,
            password: Fan::new(RawKey::zero(), fanout),
        };
        debug_assert!(keystore.entry_get_raw(txn, &VERSION_SPECIAL)?.is_none());
        let entries: BTreeMap<Hash256, Hash256> = serde_json::from_str(json)
            .map_err(|e| KeystoreError::MalformedInput(e.to_string()))?;
        for (key, value) in &entries {
            keystore.entry_put_raw(txn, key, &WalletEntry::new(*value))?;
        }
        for required in [
            VERSION_SPECIAL,
            WALLET_KEY_SPECIAL,
            SALT_SPECIAL,
            CHECK_SPECIAL,
            REPRESENTATIVE_SPECIAL,
        ] {
            if keystore.entry_get_raw(txn, &required)?.is_none() {
                return Err(KeystoreError::MalformedInput(
                    "missing required wallet entry".to_string(),
                ));
            }
        }
        Ok(keystore)
    }

    fn entry_get_raw(
        &self,
        txn: &ReadTxn<'_>,
        key: &Hash256,
    ) -> Result<Option<WalletEntry>, KeystoreError> {
        match self.table.get(txn, key)? {
            Some(bytes) => Ok(Some(WalletEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn entry_put_raw(
        &self,
        txn: &WriteTxn<'_>,
        key: &Hash256,
        entry: &WalletEntry,
    ) -> Result<(), KeystoreError> {
        self.table.put(txn, key, &entry.to_bytes())?;
        Ok(())
    }

    pub fn version(&self, txn: &ReadTxn<'_>) -> Result<u32, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, &VERSION_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        Ok(entry.key.as_bytes()[31] as u32)
    }

    fn version_put(&self, txn: &WriteTxn<'_>, version: u32) -> Result<(), KeystoreError> {
        self.entry_put_raw(
            txn,
            &VERSION_SPECIAL,
            &WalletEntry::new(Hash256::from_u32(version)),
        )
    }

    pub fn salt(&self, txn: &ReadTxn<'_>) -> Result<Hash256, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, &SALT_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        Ok(entry.key)
    }

    fn check(&self, txn: &ReadTxn<'_>) -> Result<Hash256, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, &CHECK_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        Ok(entry.key)
    }

    /// The cached password-derived key. Zero on freshly created wallets.
    pub fn password(&self) -> RawKey {
        self.password.value()
    }

    /// Decrypt the wallet master key using the cached password.
    fn wallet_key(&self, txn: &ReadTxn<'_>) -> Result<RawKey, KeystoreError> {
        let envelope = self
            .entry_get_raw(txn, &WALLET_KEY_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        let password = self.password.value();
        let salt = self.salt(txn)?;
        Ok(cipher::decrypt(&envelope.key, &password, &salt.iv()))
    }

    /// Whether the cached password decrypts the wallet master key to the
    /// value the check sentinel was produced with.
    pub fn valid_password(&self, txn: &ReadTxn<'_>) -> bool {
        self.try_valid_password(txn).unwrap_or(false)
    }

    fn try_valid_password(&self, txn: &ReadTxn<'_>) -> Result<bool, KeystoreError> {
        let zero = RawKey::zero();
        let wallet_key = self.wallet_key(txn)?;
        let salt = self.salt(txn)?;
        let computed = cipher::encrypt(&zero, &wallet_key, &salt.iv());
        let stored = self.check(txn)?;
        Ok(bool::from(
            computed.as_bytes().ct_eq(stored.as_bytes()),
        ))
    }

    /// Derive the password key for this wallet's salt.
    pub fn derive_key(&self, txn: &ReadTxn<'_>, password: &str) -> Result<RawKey, KeystoreError> {
        let salt = self.salt(txn)?;
        Ok(self.kdf.derive(password, &salt))
    }

    /// Try a password: derive, cache, validate. Returns true on failure.
    ///
    /// On success any pending format upgrades run, each under its own write
    /// transaction — callers must therefore hold only a read transaction.
    pub fn attempt_password(&self, txn: &ReadTxn<'_>, password: &str) -> bool {
        let derived = match self.derive_key(txn, password) {
            Ok(key) => key,
            Err(_) => return true,
        };
        self.password.value_set(derived);
        let valid = self.valid_password(txn);
        if valid {
            if let Err(error) = self.run_upgrades(txn) {
                tracing::warn!(%error, wallet = %self.name, "wallet upgrade failed");
            }
        }
        !valid
    }

    fn run_upgrades(&self, txn: &ReadTxn<'_>) -> Result<(), KeystoreError> {
        if self.version(txn)? == VERSION_1 {
            self.upgrade_v1_v2()?;
        }
        if self.version(txn)? == VERSION_2 {
            self.upgrade_v2_v3()?;
        }
        Ok(())
    }

    /// Zero the cached password, locking the wallet.
    pub fn lock(&self) {
        self.password.value_set(RawKey::zero());
    }

    /// Re-encrypt the wallet master key under a new password and swap the
    /// cached password. Fails without touching anything if locked.
    pub fn rekey(&self, txn: &WriteTxn<'_>, password: &str) -> Result<(), KeystoreError> {
        if !self.valid_password(txn) {
            return Err(KeystoreError::InvalidPassword);
        }
        let derived = self.derive_key(txn, password)?;
        let wallet_key = self.wallet_key(txn)?;
        self.password.value_set(derived.clone());
        let salt = self.salt(txn)?;
        let envelope = cipher::encrypt(&wallet_key, &derived, &salt.iv());
        self.entry_put_raw(txn, &WALLET_KEY_SPECIAL, &WalletEntry::new(envelope))
    }

    /// Store an externally supplied private key under its public key.
    pub fn insert_adhoc(
        &self,
        txn: &WriteTxn<'_>,
        prv: &RawKey,
    ) -> Result<Account, KeystoreError> {
        if !self.valid_password(txn) {
            return Err(KeystoreError::InvalidPassword);
        }
        let public = prv.public_key();
        let wallet_key = self.wallet_key(txn)?;
        let salt = self.salt(txn)?;
        let ciphertext = cipher::encrypt(prv, &wallet_key, &salt.iv());
        self.entry_put_raw(txn, &public, &WalletEntry::new(ciphertext))?;
        Ok(public)
    }

    /// Decrypt the seed.
    pub fn seed(&self, txn: &ReadTxn<'_>) -> Result<RawKey, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, &SEED_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        let wallet_key = self.wallet_key(txn)?;
        let salt = self.salt(txn)?;
        Ok(cipher::decrypt(&entry.key, &wallet_key, &salt.iv()))
    }

    /// Replace the seed. Clears every deterministic entry and resets the
    /// chain index to zero.
    pub fn seed_set(&self, txn: &WriteTxn<'_>, prv: &RawKey) -> Result<(), KeystoreError> {
        if !self.valid_password(txn) {
            return Err(KeystoreError::InvalidPassword);
        }
        let wallet_key = self.wallet_key(txn)?;
        let salt = self.salt(txn)?;
        let ciphertext = cipher::encrypt(prv, &wallet_key, &salt.iv());
        self.entry_put_raw(txn, &SEED_SPECIAL, &WalletEntry::new(ciphertext))?;
        self.deterministic_clear(txn)
    }

    /// Private key at `index` on the seed chain:
    /// `Blake2b-256(seed ‖ big_endian_u32(index))`.
    pub fn deterministic_key(
        &self,
        txn: &ReadTxn<'_>,
        index: u32,
    ) -> Result<RawKey, KeystoreError> {
        debug_assert!(self.valid_password(txn));
        let seed = self.seed(txn)?;
        let mut hasher = Blake2b256::new();
        hasher.update(seed.as_bytes());
        hasher.update(index.to_be_bytes());
        Ok(RawKey::from_bytes(hasher.finalize().into()))
    }

    pub fn deterministic_index_get(&self, txn: &ReadTxn<'_>) -> Result<u32, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, &DETERMINISTIC_INDEX_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        Ok(entry.key.low_u32())
    }

    fn deterministic_index_set(
        &self,
        txn: &WriteTxn<'_>,
        index: u32,
    ) -> Result<(), KeystoreError> {
        self.entry_put_raw(
            txn,
            &DETERMINISTIC_INDEX_SPECIAL,
            &WalletEntry::new(Hash256::from_u32(index)),
        )
    }

    /// Insert the next key on the deterministic chain, skipping indexes
    /// whose public key collides with an existing entry.
    pub fn deterministic_insert(&self, txn: &WriteTxn<'_>) -> Result<Account, KeystoreError> {
        if !self.valid_password(txn) {
            return Err(KeystoreError::InvalidPassword);
        }
        let mut index = self.deterministic_index_get(txn)?;
        let mut public = self.deterministic_key(txn, index)?.public_key();
        while self.exists(txn, &public) {
            index += 1;
            public = self.deterministic_key(txn, index)?.public_key();
        }
        let marker = (1u64 << 32) | index as u64;
        self.entry_put_raw(txn, &public, &WalletEntry::new(Hash256::from_u64(marker)))?;
        self.deterministic_index_set(txn, index + 1)?;
        Ok(public)
    }

    /// Erase every deterministic entry and reset the chain index.
    pub fn deterministic_clear(&self, txn: &WriteTxn<'_>) -> Result<(), KeystoreError> {
        let mut doomed = Vec::new();
        for entry in self.table.iter_from(txn, &SPECIAL_COUNT) {
            let (key, bytes) = entry?;
            if key_type(&WalletEntry::from_bytes(&bytes)?) == KeyType::Deterministic {
                doomed.push(key);
            }
        }
        for key in doomed {
            self.erase(txn, &key)?;
        }
        self.deterministic_index_set(txn, 0)
    }

    /// Recover the private key for a public key held in this wallet.
    ///
    /// Deterministic entries are recomputed from the seed; ad-hoc entries
    /// are decrypted. Either way the result must derive back to the
    /// requested public key or the entry is rejected as invalid.
    pub fn fetch(&self, txn: &ReadTxn<'_>, public: &Account) -> Result<RawKey, KeystoreError> {
        if !self.valid_password(txn) {
            return Err(KeystoreError::InvalidPassword);
        }
        let entry = self
            .entry_get_raw(txn, public)?
            .ok_or(KeystoreError::NotFound)?;
        let prv = match key_type(&entry) {
            KeyType::Deterministic => {
                let index = entry.key.low_u32();
                self.deterministic_key(txn, index)?
            }
            KeyType::Adhoc => {
                let wallet_key = self.wallet_key(txn)?;
                let salt = self.salt(txn)?;
                cipher::decrypt(&entry.key, &wallet_key, &salt.iv())
            }
            KeyType::Unknown => return Err(KeystoreError::InvalidKey),
        };
        if prv.public_key() != *public {
            return Err(KeystoreError::InvalidKey);
        }
        Ok(prv)
    }

    pub fn exists(&self, txn: &ReadTxn<'_>, public: &Account) -> bool {
        matches!(self.entry_get_raw(txn, public), Ok(Some(_)))
    }

    pub fn erase(&self, txn: &WriteTxn<'_>, public: &Account) -> Result<(), KeystoreError> {
        if !self.table.del(txn, public)? {
            return Err(KeystoreError::NotFound);
        }
        Ok(())
    }

    /// Every user-facing account, in key order.
    pub fn accounts(&self, txn: &ReadTxn<'_>) -> Result<Vec<Account>, KeystoreError> {
        let mut result = Vec::new();
        for entry in self.table.iter_from(txn, &SPECIAL_COUNT) {
            let (key, _) = entry?;
            result.push(key);
        }
        Ok(result)
    }

    pub fn representative(&self, txn: &ReadTxn<'_>) -> Result<Account, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, &REPRESENTATIVE_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?;
        Ok(entry.key)
    }

    pub fn representative_set(
        &self,
        txn: &WriteTxn<'_>,
        representative: &Account,
    ) -> Result<(), KeystoreError> {
        self.entry_put_raw(txn, &REPRESENTATIVE_SPECIAL, &WalletEntry::new(*representative))
    }

    /// Whether this wallet holds the key for its own representative.
    pub fn is_representative(&self, txn: &ReadTxn<'_>) -> bool {
        match self.representative(txn) {
            Ok(representative) => self.exists(txn, &representative),
            Err(_) => false,
        }
    }

    /// Cached work nonce for an account.
    pub fn work_get(&self, txn: &ReadTxn<'_>, public: &Account) -> Result<u64, KeystoreError> {
        let entry = self
            .entry_get_raw(txn, public)?
            .ok_or(KeystoreError::NotFound)?;
        Ok(entry.work)
    }

    pub fn work_put(
        &self,
        txn: &WriteTxn<'_>,
        public: &Account,
        work: u64,
    ) -> Result<(), KeystoreError> {
        let mut entry = self
            .entry_get_raw(txn, public)?
            .ok_or(KeystoreError::NotFound)?;
        entry.work = work;
        self.entry_put_raw(txn, public, &entry)
    }

    /// Export every record as `{hex key → hex slot}`. Work nonces are not
    /// exported; fixed-width hex makes the JSON key order numeric, so the
    /// specials serialize first.
    pub fn serialize_json(&self, txn: &ReadTxn<'_>) -> Result<String, KeystoreError> {
        let mut map: BTreeMap<Hash256, Hash256> = BTreeMap::new();
        for entry in self.table.iter_from(txn, &Hash256::ZERO) {
            let (key, bytes) = entry?;
            let value = WalletEntry::from_bytes(&bytes)?;
            map.insert(key, value.key);
        }
        Ok(serde_json::to_string(&map).expect("hex map serializes"))
    }

    /// Write the JSON export to a file.
    pub fn write_backup(&self, txn: &ReadTxn<'_>, path: &Path) -> Result<(), KeystoreError> {
        let json = self.serialize_json(txn)?;
        std::fs::write(path, json).map_err(|e| KeystoreError::Io(e.to_string()))
    }

    /// Move the given keys out of `other` into this wallet. Both stores
    /// must be unlocked; moved keys are re-encrypted under this wallet's
    /// master key and erased from `other`.
    pub fn move_from(
        &self,
        txn: &WriteTxn<'_>,
        other: &Keystore,
        keys: &[Account],
    ) -> Result<(), KeystoreError> {
        if !self.valid_password(txn) || !other.valid_password(txn) {
            return Err(KeystoreError::InvalidPassword);
        }
        for key in keys {
            let prv = other.fetch(txn, key)?;
            self.insert_adhoc(txn, &prv)?;
            other.erase(txn, key)?;
        }
        Ok(())
    }

    /// Move every entry of `other` into this wallet.
    pub fn import(&self, txn: &WriteTxn<'_>, other: &Keystore) -> Result<(), KeystoreError> {
        let keys = other.accounts(txn)?;
        self.move_from(txn, other, &keys)
    }

    /// Drop the wallet table and all its entries.
    pub fn destroy(&self, txn: &WriteTxn<'_>) -> Result<(), KeystoreError> {
        self.store.drop_table(txn, &self.name)?;
        Ok(())
    }

    /// v1 → v2: repair entries written under a miscomputed wallet master.
    ///
    /// Early wallets encrypted entries under the master obtained by
    /// decrypting the envelope with either the all-zero password or the
    /// empty-string-derived password. Re-derive both candidate masters and
    /// re-insert any entry that round-trips to its public key under one of
    /// them.
    fn upgrade_v1_v2(&self) -> Result<(), KeystoreError> {
        let txn = self.store.tx_begin_write();
        debug_assert_eq!(self.version(&txn)?, VERSION_1);
        tracing::info!(wallet = %self.name, "upgrading wallet store v1 -> v2");
        let envelope = self
            .entry_get_raw(&txn, &WALLET_KEY_SPECIAL)?
            .ok_or(KeystoreError::NotFound)?
            .key;
        let iv = self.salt(&txn)?.iv();
        let zero_password_master = cipher::decrypt(&envelope, &RawKey::zero(), &iv);
        let empty_derived = self.derive_key(&txn, "")?;
        let empty_password_master = cipher::decrypt(&envelope, &empty_derived, &iv);
        let mut entries = Vec::new();
        for entry in self.table.iter_from(&txn, &SPECIAL_COUNT) {
            let (key, bytes) = entry?;
            entries.push((key, WalletEntry::from_bytes(&bytes)?.key));
        }
        for (account, slot) in entries {
            if self.fetch(&txn, &account).is_ok() {
                continue;
            }
            // Entry fails to decrypt despite a valid password; try both
            // historical candidate masters.
            let candidate = cipher::decrypt(&slot, &zero_password_master, &iv);
            if candidate.public_key() == account {
                self.insert_adhoc(&txn, &candidate)?;
                continue;
            }
            let candidate = cipher::decrypt(&slot, &empty_password_master, &iv);
            if candidate.public_key() == account {
                self.insert_adhoc(&txn, &candidate)?;
            }
        }
        self.version_put(&txn, VERSION_2)
    }

    /// v2 → v3: introduce the deterministic seed chain. Pre-v3 wallets had
    /// no seed, so generate a fresh one.
    fn upgrade_v2_v3(&self) -> Result<(), KeystoreError> {
        let txn = self.store.tx_begin_write();
        debug_assert_eq!(self.version(&txn)?, VERSION_2);
        tracing::info!(wallet = %self.name, "upgrading wallet store v2 -> v3");
        let seed = RawKey::random();
        self.seed_set(&txn, &seed)?;
        self.version_put(&txn, VERSION_3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Arc<Store>, Arc<Kdf>) {
        (
            Arc::new(Store::open_temporary().unwrap()),
            Arc::new(Kdf::new()),
        )
    }

    fn create_keystore(store: &Arc<Store>, kdf: &Arc<Kdf>, name: &str) -> Keystore {
        let txn = store.tx_begin_write();
        Keystore::open_or_create(
            &txn,
            Arc::clone(store),
            Arc::clone(kdf),
            Hash256::ZERO,
            1,
            name,
        )
        .unwrap()
    }

    #[test]
    fn create_insert_fetch() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let prv = RawKey::from_bytes([0x01; 32]);
        let txn = store.tx_begin_write();
        assert!(keystore.valid_password(&txn));
        let public = keystore.insert_adhoc(&txn, &prv).unwrap();
        assert_eq!(public, prv.public_key());
        assert_eq!(keystore.fetch(&txn, &public).unwrap(), prv);
        assert_eq!(keystore.accounts(&txn).unwrap(), vec![public]);
    }

    #[test]
    fn fetch_unknown_key_is_not_found() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let txn = store.tx_begin_read();
        let missing = RawKey::from_bytes([0x44; 32]).public_key();
        assert!(matches!(
            keystore.fetch(&txn, &missing),
            Err(KeystoreError::NotFound)
        ));
    }

    #[test]
    fn rekey_roundtrip() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let prv = RawKey::from_bytes([0x01; 32]);
        let public;
        {
            let txn = store.tx_begin_write();
            public = keystore.insert_adhoc(&txn, &prv).unwrap();
            keystore.rekey(&txn, "hunter2").unwrap();
        }
        let txn = store.tx_begin_read();
        assert!(keystore.attempt_password(&txn, ""));
        assert!(!keystore.valid_password(&txn));
        assert!(!keystore.attempt_password(&txn, "hunter2"));
        assert!(keystore.valid_password(&txn));
        assert_eq!(keystore.fetch(&txn, &public).unwrap(), prv);
    }

    #[test]
    fn rekey_fails_while_locked() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        keystore.lock();
        let txn = store.tx_begin_write();
        assert!(matches!(
            keystore.rekey(&txn, "nope"),
            Err(KeystoreError::InvalidPassword)
        ));
    }

    #[test]
    fn locked_wallet_refuses_sensitive_operations() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let public;
        {
            let txn = store.tx_begin_write();
            public = keystore.insert_adhoc(&txn, &RawKey::random()).unwrap();
        }
        keystore.lock();
        let txn = store.tx_begin_write();
        assert!(matches!(
            keystore.fetch(&txn, &public),
            Err(KeystoreError::InvalidPassword)
        ));
        assert!(matches!(
            keystore.insert_adhoc(&txn, &RawKey::random()),
            Err(KeystoreError::InvalidPassword)
        ));
        assert!(matches!(
            keystore.deterministic_insert(&txn),
            Err(KeystoreError::InvalidPassword)
        ));
        assert!(matches!(
            keystore.seed_set(&txn, &RawKey::random()),
            Err(KeystoreError::InvalidPassword)
        ));
    }

    #[test]
    fn deterministic_chain() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let seed = RawKey::from_bytes([0xAA; 32]);
        let txn = store.tx_begin_write();
        keystore.seed_set(&txn, &seed).unwrap();
        let mut expected = Vec::new();
        for index in 0u32..3 {
            let mut hasher = Blake2b256::new();
            hasher.update(seed.as_bytes());
            hasher.update(index.to_be_bytes());
            expected.push(RawKey::from_bytes(hasher.finalize().into()).public_key());
        }
        for public in &expected {
            assert_eq!(keystore.deterministic_insert(&txn).unwrap(), *public);
        }
        assert_eq!(keystore.deterministic_index_get(&txn).unwrap(), 3);
        for public in &expected {
            let prv = keystore.fetch(&txn, public).unwrap();
            assert_eq!(prv.public_key(), *public);
        }
        // A new seed clears the chain and resets the index.
        keystore.seed_set(&txn, &RawKey::from_bytes([0xBB; 32])).unwrap();
        assert_eq!(keystore.deterministic_index_get(&txn).unwrap(), 0);
        for public in &expected {
            assert!(!keystore.exists(&txn, public));
        }
    }

    #[test]
    fn deterministic_insert_skips_adhoc_collision() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let seed = RawKey::from_bytes([0xAA; 32]);
        let txn = store.tx_begin_write();
        keystore.seed_set(&txn, &seed).unwrap();
        // Pre-insert the index-0 key as ad-hoc; the chain must skip to 1.
        let chain0 = keystore.deterministic_key(&txn, 0).unwrap();
        let chain1_public = keystore.deterministic_key(&txn, 1).unwrap().public_key();
        keystore.insert_adhoc(&txn, &chain0).unwrap();
        assert_eq!(keystore.deterministic_insert(&txn).unwrap(), chain1_public);
        assert_eq!(keystore.deterministic_index_get(&txn).unwrap(), 2);
    }

    #[test]
    fn key_type_discrimination() {
        // Deterministic marker for index 5.
        let marker = WalletEntry::new(Hash256::from_u64((1 << 32) | 5));
        assert_eq!(key_type(&marker), KeyType::Deterministic);
        assert_eq!(marker.key.low_u32(), 5);
        // Exactly 2^64 is neither marker nor ciphertext.
        let mut boundary = [0u8; 32];
        boundary[23] = 1;
        assert_eq!(key_type(&WalletEntry::new(Hash256(boundary))), KeyType::Unknown);
        // Strictly above 2^64 is ciphertext.
        let mut above = boundary;
        above[31] = 1;
        assert_eq!(key_type(&WalletEntry::new(Hash256(above))), KeyType::Adhoc);
        let mut huge = [0u8; 32];
        huge[0] = 0x80;
        assert_eq!(key_type(&WalletEntry::new(Hash256(huge))), KeyType::Adhoc);
        // Small values without the marker word are unknown.
        assert_eq!(
            key_type(&WalletEntry::new(Hash256::from_u64(42))),
            KeyType::Unknown
        );
        assert_eq!(
            key_type(&WalletEntry::new(Hash256::from_u64((2 << 32) | 5))),
            KeyType::Unknown
        );
    }

    #[test]
    fn fetch_rejects_unknown_entry_type() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let txn = store.tx_begin_write();
        // Forge an entry whose slot is a small non-marker number.
        let public = RawKey::from_bytes([0x21; 32]).public_key();
        keystore
            .entry_put_raw(&txn, &public, &WalletEntry::new(Hash256::from_u64(42)))
            .unwrap();
        assert!(matches!(
            keystore.fetch(&txn, &public),
            Err(KeystoreError::InvalidKey)
        ));
    }

    #[test]
    fn wallet_entry_roundtrip() {
        let entry = WalletEntry {
            key: Hash256::from_u64(77),
            work: 0x1122_3344_5566_7788,
        };
        let bytes = entry.to_bytes();
        assert_eq!(WalletEntry::from_bytes(&bytes).unwrap(), entry);
        assert!(WalletEntry::from_bytes(&bytes[..39]).is_err());
    }

    #[test]
    fn work_cache() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let txn = store.tx_begin_write();
        let public = keystore.insert_adhoc(&txn, &RawKey::random()).unwrap();
        assert_eq!(keystore.work_get(&txn, &public).unwrap(), 0);
        keystore.work_put(&txn, &public, 0xdead_beef).unwrap();
        assert_eq!(keystore.work_get(&txn, &public).unwrap(), 0xdead_beef);
        // The work nonce survives but is not part of the JSON export.
        let json = keystore.serialize_json(&txn).unwrap();
        assert!(!json.contains("deadbeef"));
        let missing = RawKey::random().public_key();
        assert!(matches!(
            keystore.work_get(&txn, &missing),
            Err(KeystoreError::NotFound)
        ));
    }

    #[test]
    fn json_export_import_identity() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let prv = RawKey::from_bytes([0x31; 32]);
        let json;
        {
            let txn = store.tx_begin_write();
            // Newly created wallets cache the zero key; move onto the empty
            // string password so the loaded copy can be unlocked with "".
            keystore.rekey(&txn, "").unwrap();
            keystore.insert_adhoc(&txn, &prv).unwrap();
            keystore.work_put(&txn, &prv.public_key(), 99).unwrap();
            json = keystore.serialize_json(&txn).unwrap();
        }
        let loaded;
        {
            let txn = store.tx_begin_write();
            loaded = Keystore::load_json(
                &txn,
                Arc::clone(&store),
                Arc::clone(&kdf),
                1,
                "w1",
                &json,
            )
            .unwrap();
        }
        let txn = store.tx_begin_read();
        assert!(!loaded.attempt_password(&txn, ""));
        assert_eq!(loaded.fetch(&txn, &prv.public_key()).unwrap(), prv);
        // Round-trip identity on (key, slot) pairs; work bytes are dropped.
        assert_eq!(loaded.serialize_json(&txn).unwrap(), {
            let original: BTreeMap<String, String> = serde_json::from_str(&json).unwrap();
            serde_json::to_string(&original).unwrap()
        });
    }

    #[test]
    fn json_load_rejects_bad_input() {
        let (store, kdf) = test_store();
        let txn = store.tx_begin_write();
        // Well-formed hex but no specials.
        let no_specials = format!(r#"{{"{}": "{}"}}"#, Hash256::from_u64(9), Hash256::from_u64(9));
        for json in ["not json", r#"{"00": "11"}"#, no_specials.as_str()] {
            assert!(matches!(
                Keystore::load_json(
                    &txn,
                    Arc::clone(&store),
                    Arc::clone(&kdf),
                    1,
                    "bad",
                    json
                ),
                Err(KeystoreError::MalformedInput(_))
            ));
        }
    }

    #[test]
    fn move_from_transfers_ownership() {
        let (store, kdf) = test_store();
        let w1 = create_keystore(&store, &kdf, "w1");
        let w2 = create_keystore(&store, &kdf, "w2");
        let prv = RawKey::from_bytes([0x51; 32]);
        let public = prv.public_key();
        let txn = store.tx_begin_write();
        w1.insert_adhoc(&txn, &prv).unwrap();
        w2.move_from(&txn, &w1, &[public]).unwrap();
        assert!(matches!(w1.fetch(&txn, &public), Err(KeystoreError::NotFound)));
        assert_eq!(w2.fetch(&txn, &public).unwrap(), prv);
    }

    #[test]
    fn import_moves_every_entry() {
        let (store, kdf) = test_store();
        let w1 = create_keystore(&store, &kdf, "w1");
        let w2 = create_keystore(&store, &kdf, "w2");
        let txn = store.tx_begin_write();
        let mut moved = Vec::new();
        for fill in [0x61u8, 0x62, 0x63] {
            moved.push(w1.insert_adhoc(&txn, &RawKey::from_bytes([fill; 32])).unwrap());
        }
        w2.import(&txn, &w1).unwrap();
        assert!(w1.accounts(&txn).unwrap().is_empty());
        let mut imported = w2.accounts(&txn).unwrap();
        imported.sort();
        moved.sort();
        assert_eq!(imported, moved);
    }

    #[test]
    fn representative_roundtrip() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let txn = store.tx_begin_write();
        assert_eq!(keystore.representative(&txn).unwrap(), Hash256::ZERO);
        let outside = RawKey::random().public_key();
        keystore.representative_set(&txn, &outside).unwrap();
        assert!(!keystore.is_representative(&txn));
        let public = keystore.insert_adhoc(&txn, &RawKey::random()).unwrap();
        keystore.representative_set(&txn, &public).unwrap();
        assert_eq!(keystore.representative(&txn).unwrap(), public);
        assert!(keystore.is_representative(&txn));
    }

    #[test]
    fn destroy_drops_the_table() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "doomed");
        let prv = RawKey::random();
        {
            let txn = store.tx_begin_write();
            keystore.insert_adhoc(&txn, &prv).unwrap();
            keystore.destroy(&txn).unwrap();
        }
        // Re-opening the name yields a fresh, re-initialized wallet.
        let reopened = create_keystore(&store, &kdf, "doomed");
        let txn = store.tx_begin_read();
        assert!(reopened.accounts(&txn).unwrap().is_empty());
    }

    #[test]
    fn upgrade_v1_v2_repairs_miskeyed_entries() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let prv = RawKey::from_bytes([0x71; 32]);
        let public = prv.public_key();
        {
            let txn = store.tx_begin_write();
            // Move the envelope onto the empty-string password.
            keystore.rekey(&txn, "").unwrap();
            // Write the entry the way the buggy encoder did: encrypted
            // under the master recovered with the all-zero password.
            let envelope = keystore
                .entry_get_raw(&txn, &WALLET_KEY_SPECIAL)
                .unwrap()
                .unwrap()
                .key;
            let iv = keystore.salt(&txn).unwrap().iv();
            let wrong_master = cipher::decrypt(&envelope, &RawKey::zero(), &iv);
            let ciphertext = cipher::encrypt(&prv, &wrong_master, &iv);
            keystore
                .entry_put_raw(&txn, &public, &WalletEntry::new(ciphertext))
                .unwrap();
            assert!(keystore.fetch(&txn, &public).is_err());
            keystore.version_put(&txn, VERSION_1).unwrap();
        }
        let txn = store.tx_begin_read();
        assert!(!keystore.attempt_password(&txn, ""));
        assert_eq!(keystore.version(&txn).unwrap(), VERSION_CURRENT);
        assert_eq!(keystore.fetch(&txn, &public).unwrap(), prv);
    }

    #[test]
    fn upgrade_v2_v3_generates_a_seed() {
        let (store, kdf) = test_store();
        let keystore = create_keystore(&store, &kdf, "w0");
        let old_seed;
        {
            let txn = store.tx_begin_write();
            keystore.rekey(&txn, "").unwrap();
            keystore.deterministic_insert(&txn).unwrap();
            old_seed = keystore.seed(&txn).unwrap();
            keystore.version_put(&txn, VERSION_2).unwrap();
        }
        let txn = store.tx_begin_read();
        assert!(!keystore.attempt_password(&txn, ""));
        assert_eq!(keystore.version(&txn).unwrap(), VERSION_3);
        assert_ne!(keystore.seed(&txn).unwrap(), old_seed);
        assert_eq!(keystore.deterministic_index_get(&txn).unwrap(), 0);
        assert!(keystore.accounts(&txn).unwrap().is_empty());
    }
}
