//! Ledger and network collaborator contracts, plus the block types the
//! wallet constructs.
//!
//! The wallet subsystem never validates or stores blocks itself; it builds
//! them, signs them, and hands them to the surrounding node through these
//! traits. Test doubles implement them in-memory.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::crypto::keys::{RawKey, Signature};
use crate::store::ReadTxn;
use crate::types::{Account, Hash256};

type Blake2b256 = Blake2b<U32>;

/// Ledger-side view of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    /// The account's current head block hash.
    pub head: Hash256,
    pub representative: Account,
    pub balance: u128,
}

/// Key of the ledger's pending table: who a send is addressed to, and the
/// hash of the send block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub destination: Account,
    pub hash: Hash256,
}

/// Value of the ledger's pending table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: u128,
}

/// A transfer out of an account.
#[derive(Clone, Debug)]
pub struct SendBlock {
    pub previous: Hash256,
    pub destination: Account,
    /// Balance remaining in the source account after the send.
    pub balance: u128,
    pub signature: Signature,
    pub work: u64,
}

/// A transfer into an existing account.
#[derive(Clone, Debug)]
pub struct ReceiveBlock {
    pub previous: Hash256,
    /// Hash of the send block being received.
    pub source: Hash256,
    pub signature: Signature,
    pub work: u64,
}

/// The first block of an account, receiving its opening send.
#[derive(Clone, Debug)]
pub struct OpenBlock {
    pub source: Hash256,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: u64,
}

/// A representative change.
#[derive(Clone, Debug)]
pub struct ChangeBlock {
    pub previous: Hash256,
    pub representative: Account,
    pub signature: Signature,
    pub work: u64,
}

impl SendBlock {
    pub fn new(
        previous: Hash256,
        destination: Account,
        balance: u128,
        prv: &RawKey,
        work: u64,
    ) -> Self {
        let hash = hash_send(&previous, &destination, balance);
        SendBlock {
            previous,
            destination,
            balance,
            signature: prv.sign(hash.as_bytes()),
            work,
        }
    }

    pub fn hash(&self) -> Hash256 {
        hash_send(&self.previous, &self.destination, self.balance)
    }
}

impl ReceiveBlock {
    pub fn new(previous: Hash256, source: Hash256, prv: &RawKey, work: u64) -> Self {
        let hash = hash_receive(&previous, &source);
        ReceiveBlock {
            previous,
            source,
            signature: prv.sign(hash.as_bytes()),
            work,
        }
    }

    pub fn hash(&self) -> Hash256 {
        hash_receive(&self.previous, &self.source)
    }
}

impl OpenBlock {
    pub fn new(
        source: Hash256,
        representative: Account,
        account: Account,
        prv: &RawKey,
        work: u64,
    ) -> Self {
        let hash = hash_open(&source, &representative, &account);
        OpenBlock {
            source,
            representative,
            account,
            signature: prv.sign(hash.as_bytes()),
            work,
        }
    }

    pub fn hash(&self) -> Hash256 {
        hash_open(&self.source, &self.representative, &self.account)
    }
}

impl ChangeBlock {
    pub fn new(previous: Hash256, representative: Account, prv: &RawKey, work: u64) -> Self {
        let hash = hash_change(&previous, &representative);
        ChangeBlock {
            previous,
            representative,
            signature: prv.sign(hash.as_bytes()),
            work,
        }
    }

    pub fn hash(&self) -> Hash256 {
        hash_change(&self.previous, &self.representative)
    }
}

fn hash_send(previous: &Hash256, destination: &Account, balance: u128) -> Hash256 {
    let mut hasher = Blake2b256::new();
    hasher.update(previous.as_bytes());
    hasher.update(destination.as_bytes());
    hasher.update(balance.to_be_bytes());
    Hash256(hasher.finalize().into())
}

fn hash_receive(previous: &Hash256, source: &Hash256) -> Hash256 {
    let mut hasher = Blake2b256::new();
    hasher.update(previous.as_bytes());
    hasher.update(source.as_bytes());
    Hash256(hasher.finalize().into())
}

fn hash_open(source: &Hash256, representative: &Account, account: &Account) -> Hash256 {
    let mut hasher = Blake2b256::new();
    hasher.update(source.as_bytes());
    hasher.update(representative.as_bytes());
    hasher.update(account.as_bytes());
    Hash256(hasher.finalize().into())
}

fn hash_change(previous: &Hash256, representative: &Account) -> Hash256 {
    let mut hasher = Blake2b256::new();
    hasher.update(previous.as_bytes());
    hasher.update(representative.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Any block the wallet can produce.
#[derive(Clone, Debug)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        match self {
            Block::Send(block) => block.hash(),
            Block::Receive(block) => block.hash(),
            Block::Open(block) => block.hash(),
            Block::Change(block) => block.hash(),
        }
    }

    /// The work root: the previous block, or the account for open blocks.
    pub fn root(&self) -> Hash256 {
        match self {
            Block::Send(block) => block.previous,
            Block::Receive(block) => block.previous,
            Block::Open(block) => block.account,
            Block::Change(block) => block.previous,
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Block::Send(block) => block.work,
            Block::Receive(block) => block.work,
            Block::Open(block) => block.work,
            Block::Change(block) => block.work,
        }
    }
}

/// Read-only ledger operations the wallet depends on.
pub trait Ledger: Send + Sync {
    /// The account's head block hash, if the account exists.
    fn latest(&self, txn: &ReadTxn<'_>, account: &Account) -> Option<Hash256>;

    /// The account's head, or its public key if the account has no blocks
    /// yet. This is the root new work is generated against.
    fn latest_root(&self, txn: &ReadTxn<'_>, account: &Account) -> Hash256 {
        self.latest(txn, account).unwrap_or(*account)
    }

    fn account_get(&self, txn: &ReadTxn<'_>, account: &Account) -> Option<AccountInfo>;

    fn account_balance(&self, txn: &ReadTxn<'_>, account: &Account) -> u128;

    /// Snapshot of the pending table in key order.
    fn pending(&self, txn: &ReadTxn<'_>) -> Vec<(PendingKey, PendingInfo)>;

    fn pending_exists(&self, txn: &ReadTxn<'_>, key: &PendingKey) -> bool;

    fn block_get(&self, txn: &ReadTxn<'_>, hash: &Hash256) -> Option<Block>;

    /// Voting weight delegated to an account.
    fn weight(&self, txn: &ReadTxn<'_>, account: &Account) -> u128;
}

/// Network and consensus operations the wallet depends on.
pub trait Network: Send + Sync {
    /// Ask peers to confirm a block.
    fn broadcast_confirm_req(&self, block: &Block);

    /// Hand a freshly produced block to the node for processing and
    /// republishing.
    fn process_receive_republish(&self, block: Block);

    /// Start consensus on a block; `on_confirmed` fires once it settles.
    fn start_election(&self, block: Block, on_confirmed: Box<dyn FnOnce(Block) + Send>);
}
