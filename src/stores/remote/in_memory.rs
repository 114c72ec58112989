use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::FutureExt;
use serde_json::Value;

use crate::engine::config::QueryClauses;
use crate::engine::error::{internal_error, invalid_argument, not_found, MagnetarResult};
use crate::engine::model::split_module_path;
use crate::engine::{DocData, FetchedDoc, SharedSnapshotSink};
use crate::platform::runtime::spawn_detached;
use crate::stores::query_evaluator::{apply_query, cursor_for};
use crate::util::{assign_fields, deep_merge, remove_field_path};

use super::datastore::{ListenTarget, Listener, QueryPage, RemoteDatastore, WriteOperation};

type Documents = BTreeMap<String, DocData>;

struct ListenerEntry {
    id: u64,
    target: ListenTarget,
    sink: SharedSnapshotSink,
    /// Results last delivered to the sink, keyed by document id.
    delivered: Option<BTreeMap<String, DocData>>,
}

enum Change {
    Added(String, DocData),
    Modified(String, DocData),
    Removed(String),
}

#[derive(Default)]
struct InMemoryState {
    documents: Mutex<Documents>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    commits: Mutex<Vec<Vec<WriteOperation>>>,
}

/// A datastore kept in process memory, with live listeners that are notified
/// after every commit.
#[derive(Clone, Default)]
pub struct InMemoryRemoteDatastore {
    state: Arc<InMemoryState>,
}

fn doc_id_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, id)| id)
}

fn collection_docs(documents: &Documents, collection_path: &str) -> Vec<(String, DocData)> {
    documents
        .iter()
        .filter_map(|(path, data)| match path.rsplit_once('/') {
            Some((parent, id)) if parent == collection_path => Some((id.to_string(), data.clone())),
            _ => None,
        })
        .collect()
}

fn target_results(documents: &Documents, target: &ListenTarget) -> BTreeMap<String, DocData> {
    match target {
        ListenTarget::Doc(path) => documents
            .get(path)
            .map(|data| (doc_id_of(path).to_string(), data.clone()))
            .into_iter()
            .collect(),
        ListenTarget::Query {
            collection_path,
            clauses,
        } => apply_query(collection_docs(documents, collection_path), clauses, None)
            .into_iter()
            .collect(),
    }
}

fn diff(previous: &BTreeMap<String, DocData>, current: &BTreeMap<String, DocData>) -> Vec<Change> {
    let mut changes: Vec<Change> = previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .map(|id| Change::Removed(id.clone()))
        .collect();
    for (id, data) in current {
        match previous.get(id) {
            None => changes.push(Change::Added(id.clone(), data.clone())),
            Some(old) if old != data => changes.push(Change::Modified(id.clone(), data.clone())),
            Some(_) => {}
        }
    }
    changes
}

fn deliver(sink: &SharedSnapshotSink, changes: Vec<Change>) {
    for change in changes {
        match change {
            Change::Added(id, data) => sink.added(&id, data),
            Change::Modified(id, data) => sink.modified(&id, data),
            Change::Removed(id) => sink.removed(&id),
        }
    }
}

impl InMemoryRemoteDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document without going through a commit.
    pub fn with_document(self, path: &str, data: DocData) -> Self {
        self.state
            .documents
            .lock()
            .unwrap()
            .insert(path.to_string(), data);
        self
    }

    pub fn document(&self, path: &str) -> Option<DocData> {
        self.state.documents.lock().unwrap().get(path).cloned()
    }

    /// Every batch committed so far, oldest first.
    pub fn commits(&self) -> Vec<Vec<WriteOperation>> {
        self.state.commits.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.lock().unwrap().len()
    }

    fn apply(documents: &mut Documents, write: WriteOperation) -> MagnetarResult<()> {
        match write {
            WriteOperation::Set { path, data } => {
                documents.insert(path, data);
            }
            WriteOperation::Merge { path, data } => {
                deep_merge(documents.entry(path).or_default(), &data);
            }
            WriteOperation::Assign { path, data } => {
                assign_fields(documents.entry(path).or_default(), &data);
            }
            WriteOperation::DeleteFields { path, fields } => {
                let current = documents
                    .get_mut(&path)
                    .ok_or_else(|| not_found(format!("Document {path} does not exist")))?;
                for field in &fields {
                    remove_field_path(current, field);
                }
            }
            WriteOperation::Delete { path } => {
                documents.remove(&path);
            }
        }
        Ok(())
    }

    /// Sends each listener the changes since its last delivery.
    fn notify_listeners(&self) {
        let pending: Vec<(SharedSnapshotSink, Vec<Change>)> = {
            let documents = self.state.documents.lock().unwrap();
            let mut listeners = self.state.listeners.lock().unwrap();
            listeners
                .iter_mut()
                .filter_map(|entry| {
                    let previous = entry.delivered.as_ref()?;
                    let current = target_results(&documents, &entry.target);
                    let changes = diff(previous, &current);
                    entry.delivered = Some(current);
                    Some((Arc::clone(&entry.sink), changes))
                })
                .collect()
        };
        for (sink, changes) in pending {
            deliver(&sink, changes);
        }
    }

    /// Delivers the initial results of listener `id`, unless it was closed already.
    fn deliver_initial(&self, id: u64) {
        let initial = {
            let documents = self.state.documents.lock().unwrap();
            let mut listeners = self.state.listeners.lock().unwrap();
            listeners.iter_mut().find(|entry| entry.id == id).map(|entry| {
                let current = target_results(&documents, &entry.target);
                let changes = diff(&BTreeMap::new(), &current);
                entry.delivered = Some(current);
                (Arc::clone(&entry.sink), changes)
            })
        };
        if let Some((sink, changes)) = initial {
            deliver(&sink, changes);
        }
    }
}

#[async_trait]
impl RemoteDatastore for InMemoryRemoteDatastore {
    async fn get_document(&self, path: &str) -> MagnetarResult<Option<DocData>> {
        Ok(self.document(path))
    }

    async fn run_query(
        &self,
        collection_path: &str,
        clauses: &QueryClauses,
        start_after: Option<&Value>,
    ) -> MagnetarResult<QueryPage> {
        let candidates = collection_docs(&self.state.documents.lock().unwrap(), collection_path);
        let docs = apply_query(candidates, clauses, start_after);
        let reached_end = docs.is_empty()
            || clauses
                .limit
                .map_or(true, |limit| docs.len() < limit as usize);
        let cursor = docs
            .last()
            .map(|(id, data)| cursor_for(id, data, &clauses.order_by));
        Ok(QueryPage {
            docs: docs
                .into_iter()
                .map(|(id, data)| FetchedDoc { id, data })
                .collect(),
            reached_end,
            cursor,
        })
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> MagnetarResult<()> {
        {
            let mut documents = self.state.documents.lock().unwrap();
            let mut staged = documents.clone();
            for write in writes.iter().cloned() {
                Self::apply(&mut staged, write)?;
            }
            *documents = staged;
        }
        self.state.commits.lock().unwrap().push(writes);
        self.notify_listeners();
        Ok(())
    }

    async fn listen(&self, target: ListenTarget, sink: SharedSnapshotSink) -> MagnetarResult<Listener> {
        if let ListenTarget::Doc(path) = &target {
            let (_, doc_id) = split_module_path(path)?;
            if doc_id.is_none() {
                return Err(invalid_argument(format!("'{path}' is not a document path")));
            }
        }

        let id = self.state.next_listener_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.listeners.lock().unwrap().push(ListenerEntry {
            id,
            target,
            sink,
            delivered: None,
        });

        let (delivered, first_snapshot) = oneshot::channel();
        let datastore = self.clone();
        spawn_detached(async move {
            datastore.deliver_initial(id);
            let _ = delivered.send(());
        });

        let datastore = self.clone();
        Ok(Listener {
            close: Box::new(move || {
                datastore
                    .state
                    .listeners
                    .lock()
                    .unwrap()
                    .retain(|entry| entry.id != id);
            }),
            first_snapshot: first_snapshot
                .map(|sent| sent.map_err(|_| internal_error("listener dropped before its first snapshot")))
                .boxed(),
        })
    }
}
