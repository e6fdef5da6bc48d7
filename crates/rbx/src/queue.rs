//! 🎬 *[a bucket listing trickles in. somewhere, twenty workers crack their knuckles.]*
//! *[the clock on the wall reads 2:47am.]*
//! *[nobody knows how many keys there are. that's the fun part.]*
//!
//! 🚦 The bounded worker queue — the one piece of this crate with real opinions
//! about concurrency and failure.
//!
//! - `push` drops an item on the pending channel. Unbounded, because the key
//!   stream must never stall waiting for fetches to finish.
//! - `concurrency` workers drain that channel, so at most that many handler
//!   calls are ever in flight. Not a correctness bound, a politeness bound.
//!   The cluster has feelings.
//! - A handler that errors (or panics) is logged, counted as failed, and still
//!   counts as completed. One bad key never sinks the ship.
//! - `drained()` wakes up whenever completed catches up with pushed. It means
//!   "empty right now", not "done forever". More keys may still be on their way,
//!   which is the export tracker's problem, not ours.
//!
//! 🦆 (the duck has no comment at this time)

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 🏗️ Does the work for one item. Shared by every worker, so `&self` only.
/// Anything mutable across items is the handler's own business to make safe.
#[async_trait]
pub(crate) trait Handler<T>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> Result<()>;
}

/// 📊 A snapshot of the queue's books.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct QueueStats {
    pub pushed: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl QueueStats {
    /// ✅ Completed includes failed. Succeeded is what's left.
    /// A mid-run snapshot can see a failure before its completion, hence saturating.
    pub(crate) fn succeeded(&self) -> usize {
        self.completed.saturating_sub(self.failed)
    }
}

/// 📒 The ledger every worker writes to. Atomics, owned by the queue, nowhere else.
#[derive(Debug, Default)]
struct Ledger {
    pushed: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    drained: Notify,
}

impl Ledger {
    fn begin(&self) {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
    }

    fn finish(&self, failed: bool) {
        if failed {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if completed == self.pushed.load(Ordering::SeqCst) {
            // -- 🔔 notify_one keeps a permit if nobody is listening yet. no lost wake-ups.
            self.drained.notify_one();
        }
    }

    fn is_idle(&self) -> bool {
        // -- 📐 read completed first: pushed only grows, so this can never report a false idle
        let completed = self.completed.load(Ordering::SeqCst);
        completed == self.pushed.load(Ordering::SeqCst)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// 📥 The producer's end of a [`WorkQueue`]. Clone it into whatever task discovers the work.
#[derive(Debug)]
pub(crate) struct Pusher<T> {
    tx: Sender<T>,
    ledger: Arc<Ledger>,
}

// -- ✋ by hand, so cloning a pusher doesn't demand that the items be Clone too
impl<T> Clone for Pusher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<T> Pusher<T> {
    /// 📥 Enqueue one item. Never waits; the pending channel is unbounded.
    pub(crate) fn push(&self, item: T) -> Result<()> {
        self.ledger.pushed.fetch_add(1, Ordering::SeqCst);
        if self.tx.try_send(item).is_err() {
            self.ledger.pushed.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("💀 pushed onto a work queue that is already shut down"));
        }
        Ok(())
    }

    /// 📏 Items waiting for a worker (not counting the ones being handled).
    pub(crate) fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// 🚦 A growing list of work, at most `concurrency` items at a time.
#[derive(Debug)]
pub(crate) struct WorkQueue<T> {
    pusher: Pusher<T>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// 🚀 Spawn the workers. A ceiling of zero is promoted to one; a queue nobody drains is a trap.
    pub(crate) fn start<H: Handler<T>>(concurrency: usize, handler: Arc<H>) -> Self {
        let (tx, rx) = async_channel::unbounded::<T>();
        let ledger = Arc::new(Ledger::default());
        let concurrency = concurrency.max(1);

        let workers = (0..concurrency)
            .map(|worker_id| {
                let rx = rx.clone();
                let handler = Arc::clone(&handler);
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    while let Ok(item) = rx.recv().await {
                        ledger.begin();
                        let outcome = AssertUnwindSafe(handler.handle(item)).catch_unwind().await;
                        let failed = match outcome {
                            Ok(Ok(())) => false,
                            Ok(Err(err)) => {
                                warn!("⚠️ skipping item: {:#}", err);
                                true
                            }
                            Err(_) => {
                                warn!("⚠️ skipping item: the handler panicked on worker {}", worker_id);
                                true
                            }
                        };
                        ledger.finish(failed);
                    }
                    debug!("🏁 worker {} clocked out, channel closed", worker_id);
                })
            })
            .collect();

        debug!("🧵 work queue started with {} workers", concurrency);
        Self {
            pusher: Pusher { tx, ledger },
            workers,
        }
    }

    /// 📥 A producer handle, for pushing from another task.
    pub(crate) fn pusher(&self) -> Pusher<T> {
        self.pusher.clone()
    }

    #[cfg(test)]
    pub(crate) fn push(&self, item: T) -> Result<()> {
        self.pusher.push(item)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pusher.pending()
    }

    /// 😴 Nothing queued, nothing in flight. Right now, anyway.
    pub(crate) fn is_idle(&self) -> bool {
        self.pusher.ledger.is_idle()
    }

    /// 🔔 Resolves after completed catches up with pushed. Possibly final. Possibly not.
    pub(crate) async fn drained(&self) {
        self.pusher.ledger.drained.notified().await;
    }

    pub(crate) fn stats(&self) -> QueueStats {
        self.pusher.ledger.stats()
    }

    /// 🗑️ Close the channel, let the workers finish what's queued, join them.
    /// Any outstanding [`Pusher`] goes dead with it.
    pub(crate) async fn shutdown(self) -> Result<QueueStats> {
        self.pusher.tx.close();
        for worker in self.workers {
            worker
                .await
                .context("💀 a queue worker died in a way catch_unwind couldn't catch")?;
        }
        Ok(self.pusher.ledger.stats())
    }
}
