//! Integration tests for the encrypted keystore over a real backing store.
//!
//! These run against production network constants, so they exercise the
//! full-cost Argon2 path but never generate proof-of-work.

use std::sync::Arc;

use vireo::crypto::kdf::Kdf;
use vireo::crypto::keys::RawKey;
use vireo::keystore::{Keystore, KeystoreError};
use vireo::store::Store;
use vireo::types::Hash256;

fn environment() -> (Arc<Store>, Arc<Kdf>) {
    (
        Arc::new(Store::open_temporary().expect("temporary store")),
        Arc::new(Kdf::new()),
    )
}

fn create(store: &Arc<Store>, kdf: &Arc<Kdf>, name: &str) -> Keystore {
    let txn = store.tx_begin_write();
    Keystore::open_or_create(
        &txn,
        Arc::clone(store),
        Arc::clone(kdf),
        Hash256::ZERO,
        vireo::constants::DEFAULT_PASSWORD_FANOUT,
        name,
    )
    .expect("create keystore")
}

#[test]
fn full_password_lifecycle() {
    let (store, kdf) = environment();
    let keystore = create(&store, &kdf, "wallet");
    let prv = RawKey::from_bytes([0x01; 32]);
    let public;
    {
        let txn = store.tx_begin_write();
        // Fresh wallets are unlocked; move onto a real password.
        assert!(keystore.valid_password(&txn));
        public = keystore.insert_adhoc(&txn, &prv).expect("insert");
        keystore.rekey(&txn, "hunter2").expect("rekey");
        assert_eq!(keystore.fetch(&txn, &public).expect("fetch"), prv);
    }
    keystore.lock();
    {
        let txn = store.tx_begin_read();
        assert!(!keystore.valid_password(&txn));
        assert!(matches!(
            keystore.fetch(&txn, &public),
            Err(KeystoreError::InvalidPassword)
        ));
        assert!(keystore.attempt_password(&txn, "wrong"));
        assert!(!keystore.attempt_password(&txn, "hunter2"));
        assert_eq!(keystore.fetch(&txn, &public).expect("fetch"), prv);
    }
}

#[test]
fn persists_across_reopen() {
    let (store, kdf) = environment();
    let prv = RawKey::from_bytes([0x02; 32]);
    let public;
    {
        let keystore = create(&store, &kdf, "wallet");
        let txn = store.tx_begin_write();
        public = keystore.insert_adhoc(&txn, &prv).expect("insert");
        keystore.rekey(&txn, "s3cret").expect("rekey");
    }
    store.flush().expect("flush");
    // A second handle over the same table sees the same entries and
    // unlocks with the same password.
    let reopened = create(&store, &kdf, "wallet");
    let txn = store.tx_begin_read();
    assert!(!reopened.valid_password(&txn));
    assert!(!reopened.attempt_password(&txn, "s3cret"));
    assert_eq!(reopened.fetch(&txn, &public).expect("fetch"), prv);
    assert_eq!(reopened.accounts(&txn).expect("accounts"), vec![public]);
}

#[test]
fn json_roundtrip_is_an_identity_on_slots() {
    let (store, kdf) = environment();
    let keystore = create(&store, &kdf, "wallet");
    let json;
    let public;
    {
        let txn = store.tx_begin_write();
        keystore.rekey(&txn, "").expect("rekey");
        public = keystore
            .insert_adhoc(&txn, &RawKey::from_bytes([0x03; 32]))
            .expect("insert");
        keystore.work_put(&txn, &public, 7).expect("work_put");
        json = keystore.serialize_json(&txn).expect("serialize");
    }
    let loaded = {
        let txn = store.tx_begin_write();
        Keystore::load_json(&txn, Arc::clone(&store), Arc::clone(&kdf), 1, "copy", &json)
            .expect("load")
    };
    let txn = store.tx_begin_read();
    assert!(!loaded.attempt_password(&txn, ""));
    assert_eq!(
        loaded.fetch(&txn, &public).expect("fetch"),
        RawKey::from_bytes([0x03; 32])
    );
    // Work nonces are dropped by export; slots and specials survive.
    assert_eq!(loaded.work_get(&txn, &public).expect("work"), 0);
    assert_eq!(loaded.serialize_json(&txn).expect("serialize"), json);
}

#[test]
fn backup_file_matches_the_export() {
    let (store, kdf) = environment();
    let keystore = create(&store, &kdf, "wallet");
    let path = std::env::temp_dir().join(format!(
        "vireo-backup-{}.json",
        vireo::crypto::random_hash().to_hex()
    ));
    let txn = store.tx_begin_read();
    keystore.write_backup(&txn, &path).expect("backup");
    let written = std::fs::read_to_string(&path).expect("read backup");
    assert_eq!(written, keystore.serialize_json(&txn).expect("serialize"));
    std::fs::remove_file(&path).expect("cleanup");
}

#[test]
fn load_rejects_truncated_exports() {
    let (store, kdf) = environment();
    let txn = store.tx_begin_write();
    assert!(matches!(
        Keystore::load_json(&txn, Arc::clone(&store), Arc::clone(&kdf), 1, "bad", "{}"),
        Err(KeystoreError::MalformedInput(_))
    ));
}

#[test]
fn move_between_wallets() {
    let (store, kdf) = environment();
    let w1 = create(&store, &kdf, "w1");
    let w2 = create(&store, &kdf, "w2");
    let prv = RawKey::from_bytes([0x04; 32]);
    let public = prv.public_key();
    let txn = store.tx_begin_write();
    w1.insert_adhoc(&txn, &prv).expect("insert");
    w2.move_from(&txn, &w1, &[public]).expect("move");
    assert!(matches!(
        w1.fetch(&txn, &public),
        Err(KeystoreError::NotFound)
    ));
    assert_eq!(w2.fetch(&txn, &public).expect("fetch"), prv);
}

#[test]
fn deterministic_chain_follows_the_seed() {
    let (store, kdf) = environment();
    let keystore = create(&store, &kdf, "wallet");
    let txn = store.tx_begin_write();
    let seed = RawKey::from_bytes([0xAA; 32]);
    keystore.seed_set(&txn, &seed).expect("seed_set");
    let first = keystore.deterministic_insert(&txn).expect("insert");
    let second = keystore.deterministic_insert(&txn).expect("insert");
    assert_ne!(first, second);
    assert_eq!(keystore.deterministic_index_get(&txn).expect("index"), 2);
    // Both keys recompute from the seed and derive back to their public
    // keys on fetch.
    assert_eq!(keystore.fetch(&txn, &first).expect("fetch").public_key(), first);
    assert_eq!(
        keystore.fetch(&txn, &second).expect("fetch").public_key(),
        second
    );
    // Replacing the seed resets the chain.
    keystore
        .seed_set(&txn, &RawKey::from_bytes([0xBB; 32]))
        .expect("seed_set");
    assert_eq!(keystore.deterministic_index_get(&txn).expect("index"), 0);
    assert!(!keystore.exists(&txn, &first));
    assert!(!keystore.exists(&txn, &second));
}
