use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;

use crate::engine::backup::{Backup, BackupRegistry};
use crate::engine::config::InitialData;
use crate::engine::error::{invalid_argument, MagnetarResult};
use crate::engine::{
    ActionName, ActionPayload, DocData, GetOutcome, ModuleData, ModuleRequest, PluginRequest,
    SharedSnapshotSink, SnapshotSink, StorePlugin, StreamOutcome,
};
use crate::logger::Logger;
use crate::stores::query_evaluator::apply_query;
use crate::util::{assign_fields, deep_merge, remove_field_path};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@magnetar/simple-store"));

type Collection = BTreeMap<String, DocData>;

#[derive(Default)]
struct SimpleStoreState {
    data: Mutex<HashMap<String, Collection>>,
    backups: Mutex<BackupRegistry>,
    modules_set_up: Mutex<HashSet<String>>,
}

impl SimpleStoreState {
    fn read_doc(&self, collection_path: &str, doc_id: &str) -> Option<DocData> {
        self.data
            .lock()
            .unwrap()
            .get(collection_path)
            .and_then(|collection| collection.get(doc_id))
            .cloned()
    }

    fn set_doc(&self, collection_path: &str, doc_id: &str, doc: DocData) {
        self.data
            .lock()
            .unwrap()
            .entry(collection_path.to_string())
            .or_default()
            .insert(doc_id.to_string(), doc);
    }

    fn remove_doc(&self, collection_path: &str, doc_id: &str) {
        if let Some(collection) = self.data.lock().unwrap().get_mut(collection_path) {
            collection.remove(doc_id);
        }
    }

    /// Snapshots the document, then applies `mutate` to it. `mutate` returns the
    /// new document, or `None` to delete it.
    fn mutate_doc<F>(&self, collection_path: &str, doc_id: &str, mutate: F)
    where
        F: FnOnce(Option<DocData>) -> Option<DocData>,
    {
        let current = self.read_doc(collection_path, doc_id);
        self.backups
            .lock()
            .unwrap()
            .push(collection_path, doc_id, Backup::from(current.clone()));
        match mutate(current) {
            Some(doc) => self.set_doc(collection_path, doc_id, doc),
            None => self.remove_doc(collection_path, doc_id),
        }
    }

    fn discard_backup(&self, collection_path: &str, doc_id: &str) {
        self.backups.lock().unwrap().pop(collection_path, doc_id);
    }

    fn restore(&self, collection_path: &str, doc_id: &str) {
        let backup = self.backups.lock().unwrap().pop(collection_path, doc_id);
        match backup {
            Some(Backup::Existing(doc)) => self.set_doc(collection_path, doc_id, doc),
            Some(Backup::Absent) => self.remove_doc(collection_path, doc_id),
            None => {}
        }
    }
}

/// Writes snapshots delivered by other stores into the local data, without backups.
struct SimpleStoreSink {
    state: Arc<SimpleStoreState>,
    collection_path: String,
    doc_id: Option<String>,
}

impl SimpleStoreSink {
    fn target<'a>(&'a self, doc_id: &'a str) -> &'a str {
        self.doc_id.as_deref().unwrap_or(doc_id)
    }
}

impl SnapshotSink for SimpleStoreSink {
    fn added(&self, doc_id: &str, data: DocData) {
        self.state
            .set_doc(&self.collection_path, self.target(doc_id), data);
    }

    fn modified(&self, doc_id: &str, data: DocData) {
        self.added(doc_id, data);
    }

    fn removed(&self, doc_id: &str) {
        self.state
            .remove_doc(&self.collection_path, self.target(doc_id));
    }
}

/// In-memory local store.
///
/// Keeps documents per collection path, snapshots every document before it is
/// written so the write can be reverted, and caches documents fetched or
/// streamed by the stores after it.
#[derive(Clone, Default)]
pub struct SimpleStore {
    state: Arc<SimpleStoreState>,
}

impl SimpleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots waiting to be restored for a document.
    pub fn backup_depth(&self, collection_path: &str, doc_id: &str) -> usize {
        self.state
            .backups
            .lock()
            .unwrap()
            .depth(collection_path, doc_id)
    }

    fn sink(&self, request: &PluginRequest) -> SharedSnapshotSink {
        Arc::new(SimpleStoreSink {
            state: Arc::clone(&self.state),
            collection_path: request.collection_path().to_string(),
            doc_id: request.doc_id().map(str::to_string),
        })
    }

    fn write_target<'a>(
        &self,
        action: ActionName,
        request: &'a PluginRequest,
    ) -> MagnetarResult<(&'a str, &'a str)> {
        match request.doc_id() {
            Some(doc_id) => Ok((request.collection_path(), doc_id)),
            None => Err(invalid_argument(format!(
                "{} needs a document, got collection '{}'",
                action.as_str(),
                request.collection_path()
            ))),
        }
    }

    fn payload_doc(action: ActionName, request: &PluginRequest) -> MagnetarResult<DocData> {
        request.payload.as_doc().cloned().ok_or_else(|| {
            invalid_argument(format!("{} needs a document payload", action.as_str()))
        })
    }

    fn write_with<F>(&self, action: ActionName, request: &PluginRequest, apply: F) -> MagnetarResult<()>
    where
        F: FnOnce(Option<DocData>, DocData) -> Option<DocData>,
    {
        let (collection_path, doc_id) = self.write_target(action, request)?;
        let payload = Self::payload_doc(action, request)?;
        self.state
            .mutate_doc(collection_path, doc_id, |current| apply(current, payload));
        Ok(())
    }
}

#[async_trait]
impl StorePlugin for SimpleStore {
    async fn get(&self, request: PluginRequest) -> MagnetarResult<GetOutcome> {
        Ok(GetOutcome::Sink(self.sink(&request)))
    }

    async fn stream(
        &self,
        request: PluginRequest,
        _sink: SharedSnapshotSink,
    ) -> MagnetarResult<StreamOutcome> {
        Ok(StreamOutcome::Sink(self.sink(&request)))
    }

    async fn insert(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.write_with(ActionName::Insert, &request, |_, payload| Some(payload))
    }

    async fn merge(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.write_with(ActionName::Merge, &request, |current, payload| {
            let mut doc = current.unwrap_or_default();
            deep_merge(&mut doc, &payload);
            Some(doc)
        })
    }

    async fn assign(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.write_with(ActionName::Assign, &request, |current, payload| {
            let mut doc = current.unwrap_or_default();
            assign_fields(&mut doc, &payload);
            Some(doc)
        })
    }

    async fn replace(&self, request: PluginRequest) -> MagnetarResult<()> {
        self.write_with(ActionName::Replace, &request, |_, payload| Some(payload))
    }

    async fn delete_prop(&self, request: PluginRequest) -> MagnetarResult<()> {
        let (collection_path, doc_id) = self.write_target(ActionName::DeleteProp, &request)?;
        let ActionPayload::Props(props) = &request.payload else {
            return Err(invalid_argument("deleteProp needs a list of field paths"));
        };
        self.state.mutate_doc(collection_path, doc_id, |current| {
            current.map(|mut doc| {
                for prop in props {
                    remove_field_path(&mut doc, prop);
                }
                doc
            })
        });
        Ok(())
    }

    async fn delete(&self, request: PluginRequest) -> MagnetarResult<()> {
        let (collection_path, doc_id) = self.write_target(ActionName::Delete, &request)?;
        self.state.mutate_doc(collection_path, doc_id, |_| None);
        Ok(())
    }

    async fn revert(&self, action: ActionName, request: PluginRequest) -> MagnetarResult<()> {
        if matches!(action, ActionName::Get | ActionName::Stream) {
            return Ok(());
        }
        if let Some(doc_id) = request.doc_id() {
            LOGGER.debug(format!(
                "reverting {} on '{}/{doc_id}'",
                action.as_str(),
                request.collection_path()
            ));
            self.state.restore(request.collection_path(), doc_id);
        }
        Ok(())
    }

    fn settle(&self, action: ActionName, request: &PluginRequest) {
        if matches!(action, ActionName::Get | ActionName::Stream) {
            return;
        }
        if let Some(doc_id) = request.doc_id() {
            self.state.discard_backup(request.collection_path(), doc_id);
        }
    }

    fn setup_module(&self, request: &ModuleRequest) {
        let module_path = request.module_path();
        if !self
            .state
            .modules_set_up
            .lock()
            .unwrap()
            .insert(module_path)
        {
            return;
        }

        let mut data = self.state.data.lock().unwrap();
        let collection = data.entry(request.collection_path.clone()).or_default();
        match (&request.module_config.store.initial_data, &request.doc_id) {
            (Some(InitialData::Doc(doc)), Some(doc_id)) => {
                collection.insert(doc_id.clone(), doc.clone());
            }
            (Some(InitialData::Collection(docs)), None) => {
                collection.extend(docs.iter().cloned());
            }
            (Some(_), _) => LOGGER.warn(format!(
                "initial data of '{}' does not match the module type",
                request.module_path()
            )),
            (None, _) => {}
        }
    }

    fn get_module_data(&self, request: &ModuleRequest) -> Option<ModuleData> {
        let data = self.state.data.lock().unwrap();
        let collection = data.get(&request.collection_path);
        let module_data = match &request.doc_id {
            Some(doc_id) => ModuleData::Doc(collection.and_then(|docs| docs.get(doc_id)).cloned()),
            None => ModuleData::Collection(apply_query(
                collection.into_iter().flatten().map(|(id, doc)| (id.clone(), doc.clone())),
                &request.module_config.clauses,
                None,
            )),
        };
        Some(module_data)
    }

    fn clear_module_data(&self, collection_path: &str) {
        self.state.data.lock().unwrap().remove(collection_path);
        self.state
            .backups
            .lock()
            .unwrap()
            .clear_collection(collection_path);
    }
}
