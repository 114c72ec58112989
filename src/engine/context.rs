//! Per-instance execution state shared by every module handle of one
//! [`Magnetar`](crate::engine::Magnetar) instance.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::engine::error::MagnetarResult;
use crate::engine::model::FetchMetaData;
use crate::engine::plugin::GetOutcome;
use crate::engine::stream::StreamRegistry;

pub type FetchFuture = Shared<BoxFuture<'static, MagnetarResult<GetOutcome>>>;
pub type WriteLock = Arc<async_lock::Mutex<()>>;

type FetchPromises = HashMap<String, HashMap<String, (u64, FetchFuture)>>;

/// The registries behind every handle. Entries are created on first use.
#[derive(Default)]
pub struct OrchestrationContext {
    collection_names: Mutex<BTreeSet<String>>,
    write_locks: Mutex<HashMap<String, WriteLock>>,
    fetch_promises: Arc<Mutex<FetchPromises>>,
    fetch_ids: AtomicU64,
    fetch_meta: Mutex<HashMap<String, FetchMetaData>>,
    streams: StreamRegistry,
}

impl OrchestrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_collection(&self, collection_path: &str) {
        self.collection_names
            .lock()
            .unwrap()
            .insert(collection_path.to_string());
    }

    /// Every collection path a handle was created for, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.collection_names.lock().unwrap().iter().cloned().collect()
    }

    /// The write lock serializing write and delete chains on `module_path`.
    pub fn write_lock(&self, module_path: &str) -> WriteLock {
        let mut locks = self.write_locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(module_path.to_string())
                .or_insert_with(|| Arc::new(async_lock::Mutex::new(()))),
        )
    }

    /// Shares an in-flight read of `store_name` for `filter_id`, starting one
    /// through `fetch` when there is none. The entry is dropped once it settles.
    pub fn shared_fetch<F>(&self, filter_id: &str, store_name: &str, fetch: F) -> FetchFuture
    where
        F: FnOnce() -> BoxFuture<'static, MagnetarResult<GetOutcome>>,
    {
        let mut promises = self.fetch_promises.lock().unwrap();
        let per_store = promises.entry(filter_id.to_string()).or_default();
        if let Some((_, in_flight)) = per_store.get(store_name) {
            return in_flight.clone();
        }

        let id = self.fetch_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let registry = Arc::clone(&self.fetch_promises);
        let filter_key = filter_id.to_string();
        let store_key = store_name.to_string();
        let started = fetch();
        let shared = async move {
            let outcome = started.await;
            let mut promises = registry.lock().unwrap();
            if let Some(per_store) = promises.get_mut(&filter_key) {
                if per_store.get(&store_key).is_some_and(|(entry_id, _)| *entry_id == id) {
                    per_store.remove(&store_key);
                }
                if per_store.is_empty() {
                    promises.remove(&filter_key);
                }
            }
            outcome
        }
        .boxed()
        .shared();
        per_store.insert(store_name.to_string(), (id, shared.clone()));
        shared
    }

    pub fn fetch_in_flight(&self, filter_id: &str, store_name: &str) -> bool {
        self.fetch_promises
            .lock()
            .unwrap()
            .get(filter_id)
            .is_some_and(|per_store| per_store.contains_key(store_name))
    }

    /// Pagination state of `where_order_by_id`; the default when never fetched.
    pub fn fetch_meta(&self, where_order_by_id: &str) -> FetchMetaData {
        self.fetch_meta
            .lock()
            .unwrap()
            .get(where_order_by_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_fetch_meta(&self, where_order_by_id: &str, meta: FetchMetaData) {
        self.fetch_meta
            .lock()
            .unwrap()
            .insert(where_order_by_id.to_string(), meta);
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }
}
