//! Proof-of-work generation pool.
//!
//! Work requests are served from a FIFO queue by a set of worker threads
//! that race to solve the front request. A monotonically increasing ticket
//! acts as the cooperative cancellation signal: the solver bumps it, and
//! peers abandon the root the next time they look. Optional hardware
//! offload is consulted synchronously before a request ever reaches the
//! CPU queue.
//!
//! The work value of `(root, nonce)` is the 8-byte Blake2b digest of
//! `nonce_le ‖ root`, read little-endian; a nonce is valid iff its value is
//! strictly below [`constants::WORK_THRESHOLD`](crate::constants::WORK_THRESHOLD).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};

use crate::constants;
use crate::types::Hash256;

type Blake2b64 = Blake2b<U8>;

/// Compute the work value for a candidate nonce.
pub fn work_value(root: &Hash256, work: u64) -> u64 {
    let mut hasher = Blake2b64::new();
    hasher.update(work.to_le_bytes());
    hasher.update(root.as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest.into())
}

/// Whether a nonce satisfies the network threshold for a root.
pub fn work_valid(root: &Hash256, work: u64) -> bool {
    work_value(root, work) < constants::WORK_THRESHOLD
}

/// Hardware work offload. Implementations own their device state; the CPU
/// pool shares nothing with them and falls back silently when they fail.
pub trait WorkDevice: Send + Sync {
    fn try_generate(&self, root: &Hash256) -> Option<u64>;
}

type WorkCallback = Box<dyn FnOnce(Option<u64>) + Send>;

/// xorshift1024* — fast non-cryptographic nonce source, seeded once per
/// worker from the process CSPRNG.
struct Xorshift1024Star {
    s: [u64; 16],
    p: usize,
}

impl Xorshift1024Star {
    fn seeded() -> Self {
        let mut bytes = [0u8; 128];
        crate::crypto::random_bytes(&mut bytes);
        let mut s = [0u64; 16];
        for (word, chunk) in s.iter_mut().zip(bytes.chunks_exact(8)) {
            *word = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        }
        // An all-zero state is a fixed point; one set bit escapes it.
        if s.iter().all(|&w| w == 0) {
            s[0] = 1;
        }
        Xorshift1024Star { s, p: 0 }
    }

    fn next(&mut self) -> u64 {
        let s0 = self.s[self.p];
        self.p = (self.p + 1) & 15;
        let mut s1 = self.s[self.p];
        s1 ^= s1 << 31;
        self.s[self.p] = s1 ^ s0 ^ (s1 >> 11) ^ (s0 >> 30);
        self.s[self.p].wrapping_mul(1_181_783_497_276_652_981)
    }
}

struct Queue {
    pending: VecDeque<(Hash256, WorkCallback)>,
    done: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    producer_condition: Condvar,
    /// Bumped by the solver (and by cancellation of the front request);
    /// workers holding a stale ticket abandon their root.
    ticket: AtomicU64,
    observer: Box<dyn Fn(bool) + Send + Sync>,
}

/// A pool of worker threads generating nonces for queued roots.
pub struct WorkPool {
    shared: Arc<Shared>,
    device: Option<Box<dyn WorkDevice>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkPool {
    /// Spawn min(`max_threads`, hardware concurrency) workers; the test
    /// network pins a single worker for determinism.
    pub fn new(max_threads: usize, device: Option<Box<dyn WorkDevice>>) -> Self {
        Self::with_observer(max_threads, device, |_| {})
    }

    /// Like [`WorkPool::new`], with an activity observer that thread 0
    /// toggles: truthy while a request is pending.
    pub fn with_observer(
        max_threads: usize,
        device: Option<Box<dyn WorkDevice>>,
        observer: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                done: false,
            }),
            producer_condition: Condvar::new(),
            ticket: AtomicU64::new(0),
            observer: Box::new(observer),
        });
        let hardware = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let count = if cfg!(test) {
            1
        } else {
            max_threads.clamp(1, hardware)
        };
        let threads = (0..count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("work-{index}"))
                    .spawn(move || worker_loop(&shared, index))
                    .expect("spawn work thread")
            })
            .collect();
        WorkPool {
            shared,
            device,
            threads,
        }
    }

    /// Request a nonce for `root`. Hardware offload is attempted
    /// synchronously; otherwise the request joins the queue and the
    /// callback fires from a worker thread once solved or cancelled.
    pub fn generate(&self, root: Hash256, callback: impl FnOnce(Option<u64>) + Send + 'static) {
        debug_assert!(!root.is_zero());
        if let Some(device) = &self.device {
            if let Some(work) = device.try_generate(&root) {
                callback(Some(work));
                return;
            }
        }
        {
            let mut queue = self.shared.queue.lock().expect("work pool mutex poisoned");
            debug_assert!(!queue.done, "generate after stop");
            queue.pending.push_back((root, Box::new(callback)));
        }
        self.shared.producer_condition.notify_all();
    }

    /// Synchronous convenience over [`WorkPool::generate`]. Returns `None`
    /// only if the request is cancelled before a solution is found.
    pub fn generate_blocking(&self, root: Hash256) -> Option<u64> {
        let (sender, receiver) = mpsc::channel();
        self.generate(root, move |work| {
            let _ = sender.send(work);
        });
        receiver.recv().ok().flatten()
    }

    /// Remove every pending request for `root`, delivering "no result" to
    /// each. An in-flight solve of `root` is preempted via the ticket.
    pub fn cancel(&self, root: &Hash256) {
        let cancelled: Vec<WorkCallback> = {
            let mut queue = self.shared.queue.lock().expect("work pool mutex poisoned");
            if let Some((front, _)) = queue.pending.front() {
                if front == root {
                    self.shared.ticket.fetch_add(1, Ordering::Relaxed);
                }
            }
            let mut kept = VecDeque::with_capacity(queue.pending.len());
            let mut cancelled = Vec::new();
            for (pending_root, callback) in queue.pending.drain(..) {
                if pending_root == *root {
                    cancelled.push(callback);
                } else {
                    kept.push_back((pending_root, callback));
                }
            }
            queue.pending = kept;
            cancelled
        };
        for callback in cancelled {
            callback(None);
        }
    }

    /// Threshold check, callable by block-verification pipelines.
    pub fn validate(&self, root: &Hash256, work: u64) -> bool {
        work_valid(root, work)
    }

    /// Mark the pool done and wake all workers; they exit once the queue
    /// drains. Requests must not be submitted after this.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock().expect("work pool mutex poisoned");
            queue.done = true;
        }
        self.shared.producer_condition.notify_all();
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.stop();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn worker_loop(shared: &Shared, thread: usize) {
    let mut rng = Xorshift1024Star::seeded();
    let mut lock = shared.queue.lock().expect("work pool mutex poisoned");
    while !lock.done || !lock.pending.is_empty() {
        let empty = lock.pending.is_empty();
        if thread == 0 {
            // Only thread 0 drives the activity observer.
            (shared.observer)(!empty);
        }
        if let Some((root, _)) = lock.pending.front() {
            let root = *root;
            let my_ticket = shared.ticket.load(Ordering::Relaxed);
            drop(lock);
            let mut work = 0u64;
            let mut output = u64::MAX;
            // A stale ticket means another thread solved this root.
            while shared.ticket.load(Ordering::Relaxed) == my_ticket
                && output >= constants::WORK_THRESHOLD
            {
                // Tight burst on stack state only; re-check the ticket
                // once per 256 attempts to keep memory traffic down.
                let mut iteration = 256u32;
                while iteration > 0 && output >= constants::WORK_THRESHOLD {
                    work = rng.next();
                    output = work_value(&root, work);
                    iteration -= 1;
                }
            }
            lock = shared.queue.lock().expect("work pool mutex poisoned");
            if shared.ticket.load(Ordering::Relaxed) == my_ticket {
                // Ticket unchanged: this thread found the solution.
                debug_assert!(output < constants::WORK_THRESHOLD);
                debug_assert_eq!(work_value(&root, work), output);
                // Signal peers to stop working this root.
                shared.ticket.fetch_add(1, Ordering::Relaxed);
                let (_, callback) = lock
                    .pending
                    .pop_front()
                    .expect("solved request still queued");
                drop(lock);
                callback(Some(work));
                lock = shared.queue.lock().expect("work pool mutex poisoned");
            }
        } else {
            // Wait for a work request.
            lock = shared
                .producer_condition
                .wait(lock)
                .expect("work pool mutex poisoned");
        }
    }
    if thread == 0 {
        (shared.observer)(false);
    }
}
