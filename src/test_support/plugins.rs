use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::engine::error::store_action;
use crate::engine::{
    ActionName, DocData, FetchedDoc, GetOutcome, GetResponse, MagnetarResult, PluginRequest,
    SharedSnapshotSink, StorePlugin, StreamOutcome, StreamResponse,
};
use crate::platform::runtime::sleep;

#[derive(Clone, Debug)]
struct MockCall {
    action: ActionName,
    started: Instant,
    finished: Instant,
}

/// A remote-like store that records its calls.
///
/// Any action whose payload has `"shouldFail": "<store name>"` fails for that store.
pub struct MockStore {
    name: String,
    delay: Duration,
    failing_revert: bool,
    docs: BTreeMap<(String, String), DocData>,
    calls: Mutex<Vec<MockCall>>,
    reverts: Mutex<Vec<ActionName>>,
    open_streams: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            failing_revert: false,
            docs: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
            reverts: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    /// Every revert is recorded, then rejected.
    pub fn with_failing_revert(mut self) -> Self {
        self.failing_revert = true;
        self
    }

    /// A document served by `get` and `stream`.
    pub fn with_doc(mut self, collection_path: &str, doc_id: &str, data: DocData) -> Self {
        self.docs
            .insert((collection_path.to_string(), doc_id.to_string()), data);
        self
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.action.as_str())
            .collect()
    }

    /// `(started, finished)` of every call, in start order.
    pub fn windows(&self) -> Vec<(Instant, Instant)> {
        let mut windows: Vec<_> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| (call.started, call.finished))
            .collect();
        windows.sort();
        windows
    }

    pub fn reverts(&self) -> Vec<ActionName> {
        self.reverts.lock().unwrap().clone()
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn matching_docs(&self, request: &PluginRequest) -> Vec<FetchedDoc> {
        self.docs
            .iter()
            .filter(|((collection_path, doc_id), _)| {
                collection_path == request.collection_path()
                    && request.doc_id().map_or(true, |id| id == doc_id)
            })
            .map(|((_, doc_id), data)| FetchedDoc {
                id: doc_id.clone(),
                data: data.clone(),
            })
            .collect()
    }

    async fn run(&self, action: ActionName, request: &PluginRequest) -> MagnetarResult<()> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let should_fail = request
            .payload
            .as_doc()
            .and_then(|doc| doc.get("shouldFail"))
            .and_then(Value::as_str)
            == Some(self.name.as_str());
        self.calls.lock().unwrap().push(MockCall {
            action,
            started,
            finished: Instant::now(),
        });
        if should_fail {
            return Err(store_action(&self.name, format!("{} failed on purpose", action.as_str())));
        }
        Ok(())
    }
}

#[async_trait]
impl StorePlugin for MockStore {
    async fn get(&self, request: PluginRequest) -> MagnetarResult<GetOutcome> {
        self.run(ActionName::Get, &request).await?;
        Ok(GetOutcome::Response(GetResponse {
            docs: self.matching_docs(&request),
            reached_end: true,
            cursor: None,
        }))
    }

    async fn stream(
        &self,
        request: PluginRequest,
        sink: SharedSnapshotSink,
    ) -> MagnetarResult<StreamOutcome> {
        self.run(ActionName::Stream, &request).await?;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let open_streams = Arc::clone(&self.open_streams);
        let docs = self.matching_docs(&request);
        Ok(StreamOutcome::Response(StreamResponse {
            close: Box::new(move || {
                open_streams.fetch_sub(1, Ordering::SeqCst);
            }),
            first_snapshot: async move {
                for doc in docs {
                    sink.added(&doc.id, doc.data);
                }
                Ok(())
            }
            .boxed(),
        }))
    }

    async fn insert(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.run(ActionName::Insert, &request).await
    }

    async fn merge(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.run(ActionName::Merge, &request).await
    }

    async fn assign(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.run(ActionName::Assign, &request).await
    }

    async fn replace(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.run(ActionName::Replace, &request).await
    }

    async fn delete_prop(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.run(ActionName::DeleteProp, &request).await
    }

    async fn delete(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.run(ActionName::Delete, &request).await
    }

    async fn revert(&self, action: ActionName, _request: PluginRequest) -> MagnetarResult<()> {
        self.reverts.lock().unwrap().push(action);
        if self.failing_revert {
            return Err(store_action(&self.name, "revert failed on purpose"));
        }
        Ok(())
    }
}
