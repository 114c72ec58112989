//! The contract every backing store implements.
//!
//! A store receives one call per action with a [`PluginRequest`] describing the
//! target module. Local stores additionally seed and expose their data through
//! [`StorePlugin::setup_module`] and [`StorePlugin::get_module_data`], and hand
//! out a [`SnapshotSink`] from `get`/`stream` so that documents fetched by later
//! stores in the chain land in the local cache.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::engine::config::{ActionConfig, QueryClauses, StoreModuleConfig};
use crate::engine::error::MagnetarResult;

pub type DocData = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionName {
    Get,
    Stream,
    Insert,
    Merge,
    Assign,
    Replace,
    DeleteProp,
    Delete,
}

impl ActionName {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionName::Get => "get",
            ActionName::Stream => "stream",
            ActionName::Insert => "insert",
            ActionName::Merge => "merge",
            ActionName::Assign => "assign",
            ActionName::Replace => "replace",
            ActionName::DeleteProp => "deleteProp",
            ActionName::Delete => "delete",
        }
    }

    pub fn kind(self) -> ActionKind {
        match self {
            ActionName::Get | ActionName::Stream => ActionKind::Read,
            ActionName::Delete | ActionName::DeleteProp => ActionKind::Delete,
            ActionName::Insert | ActionName::Merge | ActionName::Assign | ActionName::Replace => {
                ActionKind::Write
            }
        }
    }
}

/// Action category; selects the execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Read,
    Write,
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActionPayload {
    Empty,
    Doc(DocData),
    /// Dot-separated field paths for `deleteProp`.
    Props(Vec<String>),
    /// Pagination cursor for `get`.
    StartAfter(Value),
}

impl ActionPayload {
    pub fn to_value(&self) -> Value {
        match self {
            ActionPayload::Empty => Value::Null,
            ActionPayload::Doc(data) => Value::Object(data.clone()),
            ActionPayload::Props(props) => {
                Value::Array(props.iter().cloned().map(Value::String).collect())
            }
            ActionPayload::StartAfter(cursor) => cursor.clone(),
        }
    }

    pub fn as_doc(&self) -> Option<&DocData> {
        match self {
            ActionPayload::Doc(data) => Some(data),
            _ => None,
        }
    }
}

/// Module options as seen by one particular store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PluginModuleConfig {
    pub store: StoreModuleConfig,
    pub clauses: QueryClauses,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleRequest {
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub module_config: PluginModuleConfig,
}

impl ModuleRequest {
    pub fn module_path(&self) -> String {
        match &self.doc_id {
            Some(doc_id) => format!("{}/{}", self.collection_path, doc_id),
            None => self.collection_path.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PluginRequest {
    pub payload: ActionPayload,
    pub module: ModuleRequest,
    pub action_config: ActionConfig,
}

impl PluginRequest {
    pub fn collection_path(&self) -> &str {
        &self.module.collection_path
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.module.doc_id.as_deref()
    }

    pub fn module_config(&self) -> &PluginModuleConfig {
        &self.module.module_config
    }
}

/// Receives documents produced by a fetch or a live subscription.
pub trait SnapshotSink: Send + Sync {
    fn added(&self, doc_id: &str, data: DocData);
    fn modified(&self, doc_id: &str, data: DocData);
    fn removed(&self, doc_id: &str);
}

pub type SharedSnapshotSink = Arc<dyn SnapshotSink>;

/// Forwards every snapshot event to each collected sink, in order.
#[derive(Clone, Default)]
pub struct SinkFanout {
    sinks: Vec<SharedSnapshotSink>,
}

impl SinkFanout {
    pub fn push(&mut self, sink: SharedSnapshotSink) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl SnapshotSink for SinkFanout {
    fn added(&self, doc_id: &str, data: DocData) {
        for sink in &self.sinks {
            sink.added(doc_id, data.clone());
        }
    }

    fn modified(&self, doc_id: &str, data: DocData) {
        for sink in &self.sinks {
            sink.modified(doc_id, data.clone());
        }
    }

    fn removed(&self, doc_id: &str) {
        for sink in &self.sinks {
            sink.removed(doc_id);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchedDoc {
    pub id: String,
    pub data: DocData,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetResponse {
    pub docs: Vec<FetchedDoc>,
    pub reached_end: bool,
    pub cursor: Option<Value>,
}

#[derive(Clone)]
pub enum GetOutcome {
    /// The store caches documents fetched by later stores.
    Sink(SharedSnapshotSink),
    Response(GetResponse),
}

pub type CloseStreamFn = Box<dyn FnOnce() + Send + 'static>;

pub struct StreamResponse {
    /// Stops snapshot delivery.
    pub close: CloseStreamFn,
    /// Settles once the first snapshot has been delivered to the sink.
    pub first_snapshot: BoxFuture<'static, MagnetarResult<()>>,
}

pub enum StreamOutcome {
    Sink(SharedSnapshotSink),
    Response(StreamResponse),
}

/// Current local data of a module.
#[derive(Clone, Debug, PartialEq)]
pub enum ModuleData {
    Doc(Option<DocData>),
    Collection(Vec<(String, DocData)>),
}

impl ModuleData {
    pub fn into_doc(self) -> Option<DocData> {
        match self {
            ModuleData::Doc(doc) => doc,
            ModuleData::Collection(_) => None,
        }
    }

    pub fn into_docs(self) -> Vec<(String, DocData)> {
        match self {
            ModuleData::Doc(_) => Vec::new(),
            ModuleData::Collection(docs) => docs,
        }
    }
}

#[async_trait]
pub trait StorePlugin: Send + Sync + 'static {
    async fn get(&self, request: PluginRequest) -> MagnetarResult<GetOutcome>;

    /// Opens a subscription. `sink` forwards to the sinks of the stores that ran earlier.
    async fn stream(
        &self,
        request: PluginRequest,
        sink: SharedSnapshotSink,
    ) -> MagnetarResult<StreamOutcome>;

    async fn insert(&self, request: PluginRequest) -> MagnetarResult<()>;
    async fn merge(&self, request: PluginRequest) -> MagnetarResult<()>;
    async fn assign(&self, request: PluginRequest) -> MagnetarResult<()>;
    async fn replace(&self, request: PluginRequest) -> MagnetarResult<()>;
    async fn delete_prop(&self, request: PluginRequest) -> MagnetarResult<()>;
    async fn delete(&self, request: PluginRequest) -> MagnetarResult<()>;

    /// Undoes the most recent `action` this store applied to the request's document.
    async fn revert(&self, action: ActionName, request: PluginRequest) -> MagnetarResult<()>;

    /// Called after every store in the chain applied `action`. The write can no
    /// longer be reverted, so anything kept to undo it may be dropped.
    fn settle(&self, _action: ActionName, _request: &PluginRequest) {}

    /// Called every time a module handle is created for this store.
    fn setup_module(&self, _request: &ModuleRequest) {}

    /// Current data of the module; `None` for stores that keep no local data.
    fn get_module_data(&self, _request: &ModuleRequest) -> Option<ModuleData> {
        None
    }

    /// Drops every cached document of `collection_path`.
    fn clear_module_data(&self, _collection_path: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl SnapshotSink for RecordingSink {
        fn added(&self, doc_id: &str, _data: DocData) {
            self.events.lock().unwrap().push(format!("added:{doc_id}"));
        }

        fn modified(&self, doc_id: &str, _data: DocData) {
            self.events.lock().unwrap().push(format!("modified:{doc_id}"));
        }

        fn removed(&self, doc_id: &str) {
            self.events.lock().unwrap().push(format!("removed:{doc_id}"));
        }
    }

    #[test]
    fn action_kinds() {
        assert_eq!(ActionName::Get.kind(), ActionKind::Read);
        assert_eq!(ActionName::Stream.kind(), ActionKind::Read);
        assert_eq!(ActionName::DeleteProp.kind(), ActionKind::Delete);
        assert_eq!(ActionName::Replace.kind(), ActionKind::Write);
    }

    #[test]
    fn fanout_forwards_to_every_sink() {
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let mut fanout = SinkFanout::default();
        fanout.push(first.clone());
        fanout.push(second.clone());

        fanout.added("a", DocData::new());
        fanout.removed("a");

        for sink in [first, second] {
            assert_eq!(
                sink.events.lock().unwrap().as_slice(),
                &["added:a".to_string(), "removed:a".to_string()]
            );
        }
    }
}
