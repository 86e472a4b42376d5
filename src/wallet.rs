//! Wallets and the per-account action coordinator.
//!
//! A [`Wallet`] couples a [`Keystore`] with the node collaborators it needs
//! to produce blocks: the ledger, the network, and the work pool. The
//! [`Wallets`] directory owns every open wallet plus the shared KDF and the
//! action scheduler.
//!
//! Every mutating, ledger-producing operation goes through the scheduler:
//! actions against the same account run strictly one at a time in priority
//! order, while different accounts proceed independently on the background
//! executor. Receives are prioritized by amount so larger receives land
//! first; work regeneration runs at the highest priority so the next
//! cached nonce is ready before it is needed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::crypto::kdf::Kdf;
use crate::crypto::keys::RawKey;
use crate::keystore::{Keystore, KeystoreError};
use crate::ledger::{
    Block, ChangeBlock, Ledger, Network, OpenBlock, PendingKey, ReceiveBlock, SendBlock,
};
use crate::store::{ReadTxn, Store, WriteTxn};
use crate::types::{Account, Hash256, WalletId};
use crate::work::{self, WorkPool};

/// Action priority. Receives use their amount; the two top values are
/// reserved sentinels.
pub type Priority = u128;

/// Reserved priority for cached-work regeneration.
pub const GENERATE_PRIORITY: Priority = u128::MAX;
/// Reserved priority for user-initiated sends and changes.
pub const HIGH_PRIORITY: Priority = u128::MAX - 1;

type Action = Box<dyn FnOnce() + Send>;

/// Ordering key for the per-account action map. Draining from the largest
/// key yields highest priority first, FIFO within equal priorities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ActionKey {
    priority: Priority,
    /// `u64::MAX - sequence`, so of two equal-priority actions the earlier
    /// insertion has the larger key.
    order: u64,
}

#[derive(Default)]
struct SchedulerState {
    /// Accounts with an in-flight drain task.
    current: HashSet<Account>,
    pending: HashMap<Account, BTreeMap<ActionKey, Action>>,
    sequence: u64,
}

/// Serializes wallet actions per account.
struct ActionScheduler {
    state: Mutex<SchedulerState>,
    runtime: tokio::runtime::Handle,
    /// Fired with `true` when an account's drain starts and `false` when
    /// its queue empties.
    observer: Box<dyn Fn(&Account, bool) + Send + Sync>,
}

impl ActionScheduler {
    fn with_observer(
        runtime: tokio::runtime::Handle,
        observer: impl Fn(&Account, bool) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ActionScheduler {
            state: Mutex::new(SchedulerState::default()),
            runtime,
            observer: Box::new(observer),
        })
    }

    fn queue(self: &Arc<Self>, account: Account, priority: Priority, action: Action) {
        let spawn = {
            let mut state = self.state.lock().expect("action mutex poisoned");
            state.sequence += 1;
            let key = ActionKey {
                priority,
                order: u64::MAX - state.sequence,
            };
            state
                .pending
                .entry(account)
                .or_default()
                .insert(key, action);
            state.current.insert(account)
        };
        if spawn {
            let this = Arc::clone(self);
            self.runtime.spawn_blocking(move || this.run(account));
        }
    }

    /// Whether an account currently has a drain task, i.e. whether the
    /// caller is running inside one of its actions.
    fn is_active(&self, account: &Account) -> bool {
        let state = self.state.lock().expect("action mutex poisoned");
        state.current.contains(account)
    }

    fn run(&self, account: Account) {
        (self.observer)(&account, true);
        let mut state = self.state.lock().expect("action mutex poisoned");
        loop {
            let next = state
                .pending
                .get_mut(&account)
                .and_then(|entries| entries.pop_last());
            match next {
                Some((_, action)) => {
                    drop(state);
                    action();
                    state = self.state.lock().expect("action mutex poisoned");
                }
                None => {
                    state.pending.remove(&account);
                    let erased = state.current.remove(&account);
                    debug_assert!(erased, "drained account missing from current set");
                    if !erased {
                        warn!(%account, "action drain finished for untracked account");
                    }
                    break;
                }
            }
        }
        drop(state);
        (self.observer)(&account, false);
    }
}

/// Node collaborators and configuration shared by every wallet.
pub struct WalletContext {
    pub store: Arc<Store>,
    pub ledger: Arc<dyn Ledger>,
    pub network: Arc<dyn Network>,
    pub work: Arc<WorkPool>,
    pub runtime: tokio::runtime::Handle,
    /// Receives below this amount are ignored.
    pub receive_minimum: u128,
    /// Representative assigned to newly created wallets.
    pub default_representative: Account,
    /// XOR-share count for the in-memory password cache.
    pub password_fanout: usize,
}

/// One wallet: an encrypted keystore plus block-producing operations.
pub struct Wallet {
    pub store: Keystore,
    kdf: Arc<Kdf>,
    ctx: Arc<WalletContext>,
    scheduler: Arc<ActionScheduler>,
    lock_observer: Mutex<Box<dyn Fn(bool, bool) + Send>>,
}

impl Wallet {
    fn new(
        txn: &WriteTxn<'_>,
        ctx: Arc<WalletContext>,
        kdf: Arc<Kdf>,
        scheduler: Arc<ActionScheduler>,
        name: &str,
    ) -> Result<Self, KeystoreError> {
        let store = Keystore::open_or_create(
            txn,
            Arc::clone(&ctx.store),
            Arc::clone(&kdf),
            ctx.default_representative,
            ctx.password_fanout,
            name,
        )?;
        Ok(Wallet {
            store,
            kdf,
            ctx,
            scheduler,
            lock_observer: Mutex::new(Box::new(|_, _| {})),
        })
    }

    /// Observe lock-state changes: `(failure, password_was_empty)`.
    pub fn on_lock_change(&self, observer: impl Fn(bool, bool) + Send + 'static) {
        *self.lock_observer.lock().expect("lock observer poisoned") = Box::new(observer);
    }

    /// Newly created wallets cache the zero key; move them onto the empty
    /// string password and unlock. Safe to call repeatedly.
    pub fn enter_initial_password(self: &Arc<Self>) {
        if self.store.password().is_zero() {
            if self.valid_password() {
                let txn = self.ctx.store.tx_begin_write();
                if let Err(error) = self.store.rekey(&txn, "") {
                    warn!(%error, "initial rekey failed");
                }
            }
            self.enter_password("");
        }
    }

    pub fn valid_password(&self) -> bool {
        let txn = self.ctx.store.tx_begin_read();
        self.store.valid_password(&txn)
    }

    /// Try a password. Returns true on failure. A successful unlock kicks
    /// off a pending-block search in the background.
    pub fn enter_password(self: &Arc<Self>, password: &str) -> bool {
        let result = {
            let txn = self.ctx.store.tx_begin_read();
            self.store.attempt_password(&txn, password)
        };
        if !result {
            let this = Arc::clone(self);
            self.ctx.runtime.spawn_blocking(move || {
                this.search_pending();
            });
        }
        let observer = self.lock_observer.lock().expect("lock observer poisoned");
        (*observer)(result, password.is_empty());
        result
    }

    /// Store an externally supplied private key and prime its work cache.
    pub fn insert_adhoc(self: &Arc<Self>, prv: &RawKey) -> Result<Account, KeystoreError> {
        let txn = self.ctx.store.tx_begin_write();
        let account = self.store.insert_adhoc(&txn, prv)?;
        self.work_ensure(&txn, &account)?;
        Ok(account)
    }

    /// Derive the next deterministic key and prime its work cache.
    pub fn deterministic_insert(self: &Arc<Self>) -> Result<Account, KeystoreError> {
        let txn = self.ctx.store.tx_begin_write();
        let account = self.store.deterministic_insert(&txn)?;
        self.work_ensure(&txn, &account)?;
        Ok(account)
    }

    pub fn exists(&self, account: &Account) -> bool {
        let txn = self.ctx.store.tx_begin_read();
        self.store.exists(&txn, account)
    }

    /// Import every key of a JSON wallet export into this wallet. The
    /// export's password must unlock it; the temporary keystore built for
    /// the import is destroyed either way.
    pub fn import(&self, json: &str, password: &str) -> Result<(), KeystoreError> {
        let name = crate::crypto::random_hash().to_hex();
        let temp = {
            let txn = self.ctx.store.tx_begin_write();
            match Keystore::load_json(
                &txn,
                Arc::clone(&self.ctx.store),
                Arc::clone(&self.kdf),
                1,
                &name,
                json,
            ) {
                Ok(temp) => temp,
                Err(error) => {
                    let _ = self.ctx.store.drop_table(&txn, &name);
                    return Err(error);
                }
            }
        };
        let unlocked = {
            let txn = self.ctx.store.tx_begin_read();
            !temp.attempt_password(&txn, password)
        };
        let txn = self.ctx.store.tx_begin_write();
        let result = if unlocked {
            self.store.import(&txn, &temp)
        } else {
            Err(KeystoreError::InvalidPassword)
        };
        temp.destroy(&txn)?;
        result
    }

    pub fn serialize(&self) -> Result<String, KeystoreError> {
        let txn = self.ctx.store.tx_begin_read();
        self.store.serialize_json(&txn)
    }

    pub fn write_backup(&self, path: &Path) -> Result<(), KeystoreError> {
        let txn = self.ctx.store.tx_begin_read();
        self.store.write_backup(&txn, path)
    }

    /// Produce the receive (or open) block for a pending send addressed to
    /// this wallet. Returns `None` — "did nothing" — when the amount is
    /// below the receive minimum, the send is no longer pending, the
    /// wallet is locked, or work generation is cancelled.
    pub fn receive_action(
        self: &Arc<Self>,
        send: &SendBlock,
        representative: Account,
        amount: u128,
    ) -> Option<Block> {
        let hash = send.hash();
        if amount < self.ctx.receive_minimum {
            info!(block = %hash, "not receiving block below receive minimum");
            return None;
        }
        let destination = send.destination;
        let block = {
            let txn = self.ctx.store.tx_begin_read();
            if !self
                .ctx
                .ledger
                .pending_exists(&txn, &PendingKey { destination, hash })
            {
                // The ledger no longer has this marked as receivable.
                return None;
            }
            let prv = match self.store.fetch(&txn, &destination) {
                Ok(prv) => prv,
                Err(_) => {
                    warn!("unable to receive, wallet locked");
                    return None;
                }
            };
            match self.ctx.ledger.account_get(&txn, &destination) {
                Some(info) => {
                    let work = self.work_fetch(&txn, &destination, &info.head)?;
                    Block::Receive(ReceiveBlock::new(info.head, hash, &prv, work))
                }
                None => {
                    let work = self.work_fetch(&txn, &destination, &destination)?;
                    Block::Open(OpenBlock::new(hash, representative, destination, &prv, work))
                }
            }
        };
        self.finish_action(destination, block)
    }

    /// Produce a representative change block for `source`.
    pub fn change_action(self: &Arc<Self>, source: Account, representative: Account) -> Option<Block> {
        let block = {
            let txn = self.ctx.store.tx_begin_read();
            if !self.store.valid_password(&txn) || !self.store.exists(&txn, &source) {
                return None;
            }
            let latest = self.ctx.ledger.latest(&txn, &source)?;
            let prv = self.store.fetch(&txn, &source).ok()?;
            let work = self.work_fetch(&txn, &source, &latest)?;
            Block::Change(ChangeBlock::new(latest, representative, &prv, work))
        };
        self.finish_action(source, block)
    }

    /// Produce a send block moving `amount` from `source` to `destination`.
    pub fn send_action(
        self: &Arc<Self>,
        source: Account,
        destination: Account,
        amount: u128,
    ) -> Option<Block> {
        let block = {
            let txn = self.ctx.store.tx_begin_read();
            if !self.store.valid_password(&txn) || !self.store.exists(&txn, &source) {
                return None;
            }
            let balance = self.ctx.ledger.account_balance(&txn, &source);
            if balance == 0 || balance < amount {
                return None;
            }
            let info = self.ctx.ledger.account_get(&txn, &source)?;
            let prv = self.store.fetch(&txn, &source).ok()?;
            let work = self.work_fetch(&txn, &source, &info.head)?;
            Block::Send(SendBlock::new(
                info.head,
                destination,
                balance - amount,
                &prv,
                work,
            ))
        };
        self.finish_action(source, block)
    }

    /// Republish a freshly produced block and queue regeneration of the
    /// account's cached work against the new head.
    fn finish_action(self: &Arc<Self>, account: Account, block: Block) -> Option<Block> {
        self.ctx.network.process_receive_republish(block.clone());
        let hash = block.hash();
        let this = Arc::clone(self);
        self.scheduler.queue(
            account,
            GENERATE_PRIORITY,
            Box::new(move || {
                this.work_generate(account, hash);
            }),
        );
        Some(block)
    }

    /// Queue a receive of `block` (which must be a send) on its destination
    /// account, prioritized by amount.
    pub fn receive_async(
        self: &Arc<Self>,
        block: Block,
        representative: Account,
        amount: u128,
        callback: impl FnOnce(Option<Block>) + Send + 'static,
    ) {
        let Block::Send(send) = block else {
            debug_assert!(false, "receive_async requires a send block");
            callback(None);
            return;
        };
        let destination = send.destination;
        let this = Arc::clone(self);
        self.scheduler.queue(
            destination,
            amount,
            Box::new(move || {
                debug_assert!(this.scheduler.is_active(&destination));
                let result = this.receive_action(&send, representative, amount);
                callback(result);
            }),
        );
    }

    /// Blocking wrapper over [`Wallet::receive_async`]; true on failure.
    pub fn receive_sync(
        self: &Arc<Self>,
        block: Block,
        representative: Account,
        amount: u128,
    ) -> bool {
        let (sender, receiver) = mpsc::channel();
        self.receive_async(block, representative, amount, move |result| {
            let _ = sender.send(result.is_none());
        });
        receiver.recv().unwrap_or(true)
    }

    /// Queue a send from `source`, at high priority.
    pub fn send_async(
        self: &Arc<Self>,
        source: Account,
        destination: Account,
        amount: u128,
        callback: impl FnOnce(Option<Block>) + Send + 'static,
    ) {
        let this = Arc::clone(self);
        self.scheduler.queue(
            source,
            HIGH_PRIORITY,
            Box::new(move || {
                debug_assert!(this.scheduler.is_active(&source));
                let result = this.send_action(source, destination, amount);
                callback(result);
            }),
        );
    }

    /// Blocking wrapper over [`Wallet::send_async`]; the produced block's
    /// hash, or `None` if the send did nothing.
    pub fn send_sync(
        self: &Arc<Self>,
        source: Account,
        destination: Account,
        amount: u128,
    ) -> Option<Hash256> {
        let (sender, receiver) = mpsc::channel();
        self.send_async(source, destination, amount, move |result| {
            let _ = sender.send(result.map(|block| block.hash()));
        });
        receiver.recv().ok().flatten()
    }

    /// Queue a representative change for `source`, at high priority.
    pub fn change_async(
        self: &Arc<Self>,
        source: Account,
        representative: Account,
        callback: impl FnOnce(Option<Block>) + Send + 'static,
    ) {
        let this = Arc::clone(self);
        self.scheduler.queue(
            source,
            HIGH_PRIORITY,
            Box::new(move || {
                debug_assert!(this.scheduler.is_active(&source));
                let result = this.change_action(source, representative);
                callback(result);
            }),
        );
    }

    /// Blocking wrapper over [`Wallet::change_async`]; true on failure.
    pub fn change_sync(self: &Arc<Self>, source: Account, representative: Account) -> bool {
        let (sender, receiver) = mpsc::channel();
        self.change_async(source, representative, move |result| {
            let _ = sender.send(result.is_none());
        });
        receiver.recv().unwrap_or(true)
    }

    /// Persist `work` for an account, unless the account's latest root has
    /// already moved past `root`.
    pub fn work_update(&self, txn: &WriteTxn<'_>, account: &Account, root: &Hash256, work: u64) {
        debug_assert!(work::work_valid(root, work));
        debug_assert!(self.store.exists(txn, account));
        if self.ctx.ledger.latest_root(txn, account) == *root {
            if let Err(error) = self.store.work_put(txn, account, work) {
                warn!(%error, "failed to persist cached work");
            }
        } else {
            debug!("cached work no longer valid, discarding");
        }
    }

    /// Cached work for `root`, generating synchronously when the cache is
    /// missing or stale. `None` only if generation is cancelled.
    pub fn work_fetch(&self, txn: &ReadTxn<'_>, account: &Account, root: &Hash256) -> Option<u64> {
        match self.store.work_get(txn, account) {
            Ok(work) if work::work_valid(root, work) => Some(work),
            Ok(_) => {
                debug!("cached work invalid, regenerating");
                self.ctx.work.generate_blocking(*root)
            }
            Err(_) => self.ctx.work.generate_blocking(*root),
        }
    }

    /// Regenerate the cached work in the background if it is stale for the
    /// account's current latest root.
    pub fn work_ensure(self: &Arc<Self>, txn: &ReadTxn<'_>, account: &Account) -> Result<(), KeystoreError> {
        debug_assert!(self.store.exists(txn, account));
        let root = self.ctx.ledger.latest_root(txn, account);
        let work = self.store.work_get(txn, account)?;
        if !work::work_valid(&root, work) {
            let this = Arc::clone(self);
            let account = *account;
            self.ctx.runtime.spawn_blocking(move || {
                this.work_generate(account, root);
            });
        }
        Ok(())
    }

    /// Generate work for `root` and persist it if still current.
    pub fn work_generate(&self, account: Account, root: Hash256) {
        let started = Instant::now();
        let Some(work) = self.ctx.work.generate_blocking(root) else {
            return;
        };
        debug!(
            elapsed_us = started.elapsed().as_micros() as u64,
            "work generation complete"
        );
        let txn = self.ctx.store.tx_begin_write();
        if self.store.exists(&txn, &account) {
            self.work_update(&txn, &account, &root, work);
        }
    }

    /// Scan the ledger's pending table for sends addressed to this wallet
    /// and probe each source account once, receiving everything it sent us
    /// once its head is confirmed. Returns true if the wallet is locked.
    pub fn search_pending(self: &Arc<Self>) -> bool {
        let keys: HashSet<Account> = {
            let txn = self.ctx.store.tx_begin_read();
            if !self.store.valid_password(&txn) {
                warn!("stopping search, wallet is locked");
                return true;
            }
            match self.store.accounts(&txn) {
                Ok(accounts) => accounts.into_iter().collect(),
                Err(error) => {
                    warn!(%error, "stopping search, cannot list accounts");
                    return true;
                }
            }
        };
        let this = Arc::clone(self);
        self.ctx.runtime.spawn_blocking(move || {
            this.search_pending_run(&keys);
        });
        false
    }

    fn search_pending_run(self: &Arc<Self>, keys: &HashSet<Account>) {
        info!("beginning pending block search");
        let txn = self.ctx.store.tx_begin_read();
        let mut already_probed = HashSet::new();
        for (key, pending) in self.ctx.ledger.pending(&txn) {
            if !keys.contains(&key.destination) {
                continue;
            }
            let Some(info) = self.ctx.ledger.account_get(&txn, &pending.source) else {
                warn!(source = %pending.source, "pending source has no account, skipping");
                continue;
            };
            info!(source = %pending.source, head = %info.head, "found a pending block");
            if !already_probed.insert(pending.source) {
                continue;
            }
            let Some(head_block) = self.ctx.ledger.block_get(&txn, &info.head) else {
                warn!(head = %info.head, "pending source head block missing, skipping");
                continue;
            };
            let this = Arc::clone(self);
            let source = pending.source;
            self.ctx.runtime.spawn_blocking(move || {
                let confirmed = Arc::clone(&this);
                this.ctx.network.start_election(
                    head_block.clone(),
                    Box::new(move |_| {
                        // Any forks for this source have been settled; we
                        // can receive whatever remains from it.
                        confirmed.receive_all(&source);
                    }),
                );
                this.ctx.network.broadcast_confirm_req(&head_block);
            });
        }
        info!("pending block search phase complete");
    }

    /// Receive every pending send from `account` addressed to this wallet.
    fn receive_all(self: &Arc<Self>, account: &Account) {
        info!(%account, "account confirmed, receiving all blocks");
        let txn = self.ctx.store.tx_begin_read();
        let representative = match self.store.representative(&txn) {
            Ok(representative) => representative,
            Err(error) => {
                warn!(%error, "cannot read representative, stopping receive");
                return;
            }
        };
        for (key, pending) in self.ctx.ledger.pending(&txn) {
            if pending.source != *account || !self.store.exists(&txn, &key.destination) {
                continue;
            }
            if !self.store.valid_password(&txn) {
                warn!(account = %key.destination, "wallet locked, skipping receive");
                continue;
            }
            let Some(block) = self.ctx.ledger.block_get(&txn, &key.hash) else {
                warn!(hash = %key.hash, "pending send block missing, skipping");
                continue;
            };
            let hash = key.hash;
            info!(block = %hash, "receiving block");
            self.receive_async(block, representative, pending.amount, move |result| {
                if result.is_none() {
                    warn!(block = %hash, "error receiving block");
                }
            });
        }
    }
}

/// Directory of open wallets plus the shared KDF and action scheduler.
pub struct Wallets {
    pub kdf: Arc<Kdf>,
    ctx: Arc<WalletContext>,
    scheduler: Arc<ActionScheduler>,
    items: Mutex<HashMap<WalletId, Arc<Wallet>>>,
}

impl Wallets {
    /// Open every wallet table present in the backing store and schedule
    /// their initial password entry.
    pub fn new(ctx: Arc<WalletContext>) -> Result<Arc<Self>, KeystoreError> {
        Self::with_observer(ctx, |_, _| {})
    }

    /// Like [`Wallets::new`], with an account-busy observer fired by the
    /// action scheduler.
    pub fn with_observer(
        ctx: Arc<WalletContext>,
        observer: impl Fn(&Account, bool) + Send + Sync + 'static,
    ) -> Result<Arc<Self>, KeystoreError> {
        let scheduler = ActionScheduler::with_observer(ctx.runtime.clone(), observer);
        let wallets = Arc::new(Wallets {
            kdf: Arc::new(Kdf::new()),
            ctx,
            scheduler,
            items: Mutex::new(HashMap::new()),
        });
        for name in wallets.ctx.store.table_names() {
            let Ok(id) = Hash256::from_hex(&name) else {
                continue;
            };
            let wallet = {
                let txn = wallets.ctx.store.tx_begin_write();
                Arc::new(Wallet::new(
                    &txn,
                    Arc::clone(&wallets.ctx),
                    Arc::clone(&wallets.kdf),
                    Arc::clone(&wallets.scheduler),
                    &name,
                )?)
            };
            wallets
                .items
                .lock()
                .expect("wallet directory poisoned")
                .insert(id, Arc::clone(&wallet));
            let opened = Arc::clone(&wallet);
            wallets.ctx.runtime.spawn_blocking(move || {
                opened.enter_initial_password();
            });
        }
        Ok(wallets)
    }

    pub fn open(&self, id: &WalletId) -> Option<Arc<Wallet>> {
        let items = self.items.lock().expect("wallet directory poisoned");
        items.get(id).cloned()
    }

    /// Create a wallet table under a new id.
    pub fn create(&self, id: &WalletId) -> Result<Arc<Wallet>, KeystoreError> {
        let wallet = {
            let txn = self.ctx.store.tx_begin_write();
            Arc::new(Wallet::new(
                &txn,
                Arc::clone(&self.ctx),
                Arc::clone(&self.kdf),
                Arc::clone(&self.scheduler),
                &id.to_hex(),
            )?)
        };
        {
            let mut items = self.items.lock().expect("wallet directory poisoned");
            debug_assert!(!items.contains_key(id));
            items.insert(*id, Arc::clone(&wallet));
        }
        let opened = Arc::clone(&wallet);
        self.ctx.runtime.spawn_blocking(move || {
            opened.enter_initial_password();
        });
        Ok(wallet)
    }

    /// Drop a wallet's table and forget it.
    pub fn destroy(&self, id: &WalletId) -> Result<(), KeystoreError> {
        let wallet = {
            let mut items = self.items.lock().expect("wallet directory poisoned");
            items.remove(id).ok_or(KeystoreError::NotFound)?
        };
        let txn = self.ctx.store.tx_begin_write();
        wallet.store.destroy(&txn)
    }

    /// Queue an action against an account. At most one action per account
    /// runs at any instant; higher priorities run first.
    pub fn queue_action(
        &self,
        account: Account,
        priority: Priority,
        action: impl FnOnce() + Send + 'static,
    ) {
        self.scheduler.queue(account, priority, Box::new(action));
    }

    /// Kick off a pending search on one wallet; true if the wallet is
    /// unknown or locked.
    pub fn search_pending(&self, id: &WalletId) -> bool {
        match self.open(id) {
            Some(wallet) => wallet.search_pending(),
            None => true,
        }
    }

    pub fn search_pending_all(&self) {
        let wallets: Vec<Arc<Wallet>> = {
            let items = self.items.lock().expect("wallet directory poisoned");
            items.values().cloned().collect()
        };
        for wallet in wallets {
            wallet.search_pending();
        }
    }

    /// Visit `(account, private key)` for every unlocked account with
    /// non-zero voting weight, across all wallets.
    pub fn foreach_representative(
        &self,
        txn: &ReadTxn<'_>,
        mut action: impl FnMut(&Account, &RawKey),
    ) {
        let wallets: Vec<Arc<Wallet>> = {
            let items = self.items.lock().expect("wallet directory poisoned");
            items.values().cloned().collect()
        };
        for wallet in wallets {
            let accounts = match wallet.store.accounts(txn) {
                Ok(accounts) => accounts,
                Err(error) => {
                    warn!(%error, "skipping unreadable wallet");
                    continue;
                }
            };
            for account in accounts {
                if self.ctx.ledger.weight(txn, &account) == 0 {
                    continue;
                }
                if !wallet.store.valid_password(txn) {
                    warn!(%account, "skipping locked wallet");
                    continue;
                }
                match wallet.store.fetch(txn, &account) {
                    Ok(prv) => action(&account, &prv),
                    Err(error) => warn!(%error, %account, "cannot fetch voting key"),
                }
            }
        }
    }

    /// Whether any open wallet holds an entry for `account`.
    pub fn exists(&self, txn: &ReadTxn<'_>, account: &Account) -> bool {
        let items = self.items.lock().expect("wallet directory poisoned");
        items
            .values()
            .any(|wallet| wallet.store.exists(txn, account))
    }
}
