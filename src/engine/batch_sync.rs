//! Debounced write batching.
//!
//! Writes enqueued under the same batch key within the debounce window are
//! committed together. Every enqueue resets the window. All callers whose write
//! ended up in a batch share that batch's single settlement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::engine::error::{internal_error, MagnetarResult};
use crate::logger::Logger;
use crate::platform::runtime::{next_tick, sleep, spawn_detached};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@magnetar/batch-sync"));

/// A batch commits immediately once it holds this many operations.
pub const MAX_BATCH_OPERATIONS: usize = 500;

/// A write that can be queued in a batch.
pub trait BatchOperation: Clone + Send + Sync + 'static {
    /// The document this operation writes to.
    fn target(&self) -> &str;

    /// Folds `next` (a later write to the same target) into `self`. Returns `next`
    /// untouched when the two cannot be expressed as one operation.
    fn absorb(&mut self, next: Self) -> Result<(), Self>;
}

pub type CommittedBatch<Op> = Arc<Vec<Op>>;
pub type BatchCommitFn<Op> =
    Arc<dyn Fn(Vec<Op>) -> BoxFuture<'static, MagnetarResult<()>> + Send + Sync + 'static>;
pub type BatchResultFuture<Op> = BoxFuture<'static, MagnetarResult<CommittedBatch<Op>>>;

type SharedBatchResult<Op> = Shared<BoxFuture<'static, MagnetarResult<CommittedBatch<Op>>>>;
type PendingBatches<Op> = Arc<Mutex<HashMap<String, PendingBatch<Op>>>>;

/// A zero-debounce batch nobody awaits is still committed after this long.
const UNAWAITED_FLUSH_DELAY: Duration = Duration::from_millis(50);

struct PendingBatch<Op: BatchOperation> {
    id: u64,
    operations: Vec<Op>,
    generation: u64,
    settle: oneshot::Sender<MagnetarResult<CommittedBatch<Op>>>,
    result: SharedBatchResult<Op>,
}

impl<Op: BatchOperation> PendingBatch<Op> {
    fn new(id: u64) -> Self {
        let (settle, receiver) = oneshot::channel();
        let result = receiver
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(internal_error("pending batch was dropped before it settled"))
                })
            })
            .boxed()
            .shared();
        Self {
            id,
            operations: Vec::new(),
            generation: 0,
            settle,
            result,
        }
    }

    fn add(&mut self, operation: Op) {
        let existing = self
            .operations
            .iter_mut()
            .rev()
            .find(|pending| pending.target() == operation.target());
        let leftover = match existing {
            Some(existing) => existing.absorb(operation).err(),
            None => Some(operation),
        };
        if let Some(operation) = leftover {
            self.operations.push(operation);
        }
    }

    async fn flush(self, batch_key: String, commit: BatchCommitFn<Op>) {
        let operations = self.operations;
        LOGGER.debug(format!(
            "committing {} operation(s) for '{batch_key}'",
            operations.len()
        ));
        let outcome = commit(operations.clone())
            .await
            .map(|()| Arc::new(operations));
        if let Err(err) = &outcome {
            log::warn!("batch commit for '{batch_key}' failed: {err}");
        }
        let _ = self.settle.send(outcome);
    }
}

/// Removes the batch under `batch_key` when `due` accepts it, then commits it.
async fn flush_if<Op, F>(pending: PendingBatches<Op>, commit: BatchCommitFn<Op>, batch_key: String, due: F)
where
    Op: BatchOperation,
    F: Fn(&PendingBatch<Op>) -> bool,
{
    let batch = {
        let mut pending = pending.lock().unwrap();
        match pending.get(&batch_key) {
            Some(batch) if due(batch) => pending.remove(&batch_key),
            _ => None,
        }
    };
    if let Some(batch) = batch {
        batch.flush(batch_key, commit).await;
    }
}

pub struct BatchSynchronizer<Op: BatchOperation> {
    commit: BatchCommitFn<Op>,
    pending: PendingBatches<Op>,
    generations: AtomicU64,
    batch_ids: AtomicU64,
}

impl<Op: BatchOperation> BatchSynchronizer<Op> {
    pub fn new(commit: BatchCommitFn<Op>) -> Self {
        Self {
            commit,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
            batch_ids: AtomicU64::new(0),
        }
    }

    /// Queues `operation` under `batch_key` and restarts that batch's debounce timer.
    ///
    /// The returned future settles with the outcome of the whole batch. With a
    /// zero debounce the batch is committed by the first caller that awaits its
    /// result, once that caller has yielded, so every write enqueued before then
    /// joins it.
    pub fn enqueue(
        &self,
        batch_key: &str,
        operation: Op,
        debounce: Duration,
    ) -> BatchResultFuture<Op> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.pending.lock().unwrap();
        let batch = pending.entry(batch_key.to_string()).or_insert_with(|| {
            PendingBatch::new(self.batch_ids.fetch_add(1, Ordering::SeqCst) + 1)
        });
        batch.add(operation);
        batch.generation = generation;
        let batch_id = batch.id;
        let result = batch.result.clone();

        if batch.operations.len() >= MAX_BATCH_OPERATIONS {
            if let Some(full) = pending.remove(batch_key) {
                drop(pending);
                spawn_detached(full.flush(batch_key.to_string(), Arc::clone(&self.commit)));
            }
            return result.boxed();
        }
        drop(pending);

        let batch_key = batch_key.to_string();
        if debounce.is_zero() {
            let fallback = flush_if(
                Arc::clone(&self.pending),
                Arc::clone(&self.commit),
                batch_key.clone(),
                move |batch| batch.id == batch_id,
            );
            spawn_detached(async move {
                sleep(UNAWAITED_FLUSH_DELAY).await;
                fallback.await;
            });
            let on_await = flush_if(
                Arc::clone(&self.pending),
                Arc::clone(&self.commit),
                batch_key,
                move |batch| batch.id == batch_id,
            );
            return async move {
                next_tick().await;
                on_await.await;
                result.await
            }
            .boxed();
        }

        let due = flush_if(
            Arc::clone(&self.pending),
            Arc::clone(&self.commit),
            batch_key,
            move |batch| batch.generation == generation,
        );
        spawn_detached(async move {
            sleep(debounce).await;
            due.await;
        });
        result.boxed()
    }

    /// Number of operations waiting under `batch_key`.
    pub fn pending_len(&self, batch_key: &str) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(batch_key)
            .map_or(0, |batch| batch.operations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::store_action;

    #[derive(Clone, Debug, PartialEq)]
    struct TestWrite {
        target: String,
        value: u32,
    }

    impl BatchOperation for TestWrite {
        fn target(&self) -> &str {
            &self.target
        }

        fn absorb(&mut self, next: Self) -> Result<(), Self> {
            self.value = next.value;
            Ok(())
        }
    }

    fn write(target: &str, value: u32) -> TestWrite {
        TestWrite {
            target: target.to_string(),
            value,
        }
    }

    type Commits = Arc<Mutex<Vec<Vec<TestWrite>>>>;

    fn recording_sync(fail: bool) -> (BatchSynchronizer<TestWrite>, Commits) {
        let commits: Commits = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commits);
        let commit: BatchCommitFn<TestWrite> = Arc::new(move |operations| {
            recorded.lock().unwrap().push(operations);
            async move {
                if fail {
                    Err(store_action("remote", "commit rejected"))
                } else {
                    Ok(())
                }
            }
            .boxed()
        });
        (BatchSynchronizer::new(commit), commits)
    }

    #[tokio::test]
    async fn writes_within_window_share_one_commit() {
        let (sync, commits) = recording_sync(false);
        let debounce = Duration::from_millis(20);
        let results: Vec<_> = (0..5)
            .map(|index| sync.enqueue("pokedex", write(&format!("pokedex/{index}"), index), debounce))
            .collect();

        let settled = futures::future::join_all(results).await;
        assert_eq!(commits.lock().unwrap().len(), 1);
        let first = settled[0].clone().unwrap();
        assert_eq!(first.len(), 5);
        for outcome in &settled {
            assert!(Arc::ptr_eq(outcome.as_ref().unwrap(), &first));
        }
    }

    #[tokio::test]
    async fn every_enqueue_resets_the_timer() {
        let (sync, commits) = recording_sync(false);
        let debounce = Duration::from_millis(80);
        let first = sync.enqueue("pokedex", write("pokedex/1", 1), debounce);
        sleep(Duration::from_millis(50)).await;
        let second = sync.enqueue("pokedex", write("pokedex/2", 2), debounce);
        sleep(Duration::from_millis(50)).await;
        assert!(commits.lock().unwrap().is_empty());
        assert_eq!(sync.pending_len("pokedex"), 2);

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().len(), 2);
        assert_eq!(second.unwrap().len(), 2);
        assert_eq!(commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_every_caller() {
        let (sync, _commits) = recording_sync(true);
        let debounce = Duration::from_millis(5);
        let first = sync.enqueue("pokedex", write("pokedex/1", 1), debounce);
        let second = sync.enqueue("pokedex", write("pokedex/2", 2), debounce);
        let (first, second) = tokio::join!(first, second);
        let first = first.unwrap_err();
        let second = second.unwrap_err();
        assert_eq!(first.code_str(), "magnetar/store-action");
        assert_eq!(first.to_string(), second.to_string());
    }

    #[tokio::test]
    async fn zero_debounce_coalesces_same_tick_writes() {
        let (sync, commits) = recording_sync(false);
        let first = sync.enqueue("pokedex", write("pokedex/1", 1), Duration::ZERO);
        let second = sync.enqueue("pokedex", write("pokedex/1", 2), Duration::ZERO);
        let committed = second.await.unwrap();
        assert_eq!(committed.as_slice(), &[write("pokedex/1", 2)]);
        assert!(Arc::ptr_eq(&first.await.unwrap(), &committed));
        assert_eq!(commits.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn zero_debounce_never_splits_back_to_back_writes() {
        let (sync, commits) = recording_sync(false);
        for round in 0..200 {
            let first = sync.enqueue("pokedex", write("pokedex/1", round), Duration::ZERO);
            let second = sync.enqueue("pokedex", write("pokedex/2", round), Duration::ZERO);
            let (first, second) = tokio::join!(first, second);
            assert_eq!(first.unwrap().len(), 2, "round {round} was split");
            assert_eq!(second.unwrap().len(), 2);
        }
        let commits = commits.lock().unwrap();
        assert_eq!(commits.len(), 200);
        assert!(commits.iter().all(|batch| batch.len() == 2));
    }

    #[tokio::test]
    async fn unawaited_zero_debounce_batch_still_commits() {
        let (sync, commits) = recording_sync(false);
        drop(sync.enqueue("pokedex", write("pokedex/1", 1), Duration::ZERO));
        sleep(UNAWAITED_FLUSH_DELAY + Duration::from_millis(30)).await;
        assert_eq!(commits.lock().unwrap().len(), 1);
        assert_eq!(sync.pending_len("pokedex"), 0);
    }

    #[tokio::test]
    async fn batch_keys_commit_independently() {
        let (sync, commits) = recording_sync(false);
        let debounce = Duration::from_millis(5);
        let pokedex = sync.enqueue("pokedex", write("pokedex/1", 1), debounce);
        let trainers = sync.enqueue("trainers", write("trainers/1", 1), debounce);
        let (pokedex, trainers) = tokio::join!(pokedex, trainers);
        assert_eq!(pokedex.unwrap().len(), 1);
        assert_eq!(trainers.unwrap().len(), 1);
        assert_eq!(commits.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn full_batch_commits_without_waiting() {
        let (sync, commits) = recording_sync(false);
        let debounce = Duration::from_secs(60);
        let mut last = None;
        for index in 0..MAX_BATCH_OPERATIONS as u32 {
            last = Some(sync.enqueue("pokedex", write(&format!("pokedex/{index}"), index), debounce));
        }
        let committed = last.unwrap().await.unwrap();
        assert_eq!(committed.len(), MAX_BATCH_OPERATIONS);
        assert_eq!(commits.lock().unwrap().len(), 1);
        assert_eq!(sync.pending_len("pokedex"), 0);
    }
}
