//! Store adapter for a remote persistence service.
//!
//! Writes are funneled through a [`BatchSynchronizer`] keyed by collection path
//! and committed to the [`RemoteDatastore`] once the debounce window closes.
//! Reads and streams go straight to the datastore.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use crate::engine::batch_sync::{BatchCommitFn, BatchSynchronizer};
use crate::engine::error::{invalid_argument, MagnetarResult};
use crate::engine::model::split_module_path;
use crate::engine::{
    ActionName, ActionPayload, DocData, FetchedDoc, GetOutcome, GetResponse, PluginRequest,
    SharedSnapshotSink, StorePlugin, StreamOutcome, StreamResponse,
};
use crate::logger::Logger;

mod datastore;
mod in_memory;

pub use datastore::{ListenTarget, Listener, QueryPage, RemoteDatastore, WriteOperation};
pub use in_memory::InMemoryRemoteDatastore;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@magnetar/remote"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteStoreOptions {
    /// Debounce applied to writes when neither the call nor the module sets one.
    pub sync_debounce_ms: u64,
    /// Sync a module to its own module path when it has no `path` configured.
    pub use_module_paths: bool,
}

impl Default for RemoteStoreOptions {
    fn default() -> Self {
        Self {
            sync_debounce_ms: 1000,
            use_module_paths: true,
        }
    }
}

impl RemoteStoreOptions {
    pub fn with_sync_debounce_ms(mut self, millis: u64) -> Self {
        self.sync_debounce_ms = millis;
        self
    }

    pub fn with_use_module_paths(mut self, enabled: bool) -> Self {
        self.use_module_paths = enabled;
        self
    }
}

pub struct RemoteStore {
    datastore: Arc<dyn RemoteDatastore>,
    options: RemoteStoreOptions,
    batches: BatchSynchronizer<WriteOperation>,
}

impl RemoteStore {
    pub fn new(datastore: Arc<dyn RemoteDatastore>, options: RemoteStoreOptions) -> Self {
        let committer = Arc::clone(&datastore);
        let commit: BatchCommitFn<WriteOperation> = Arc::new(move |writes| {
            let datastore = Arc::clone(&committer);
            async move { datastore.commit(writes).await }.boxed()
        });
        Self {
            datastore,
            options,
            batches: BatchSynchronizer::new(commit),
        }
    }

    pub fn options(&self) -> &RemoteStoreOptions {
        &self.options
    }

    /// Writes queued for `collection_path` that have not been committed yet.
    pub fn pending_writes(&self, collection_path: &str) -> usize {
        self.batches.pending_len(collection_path)
    }

    /// Remote path of the request's document.
    ///
    /// A configured collection path gets the document id appended; a configured
    /// document path is used as is.
    fn doc_path(&self, request: &PluginRequest) -> MagnetarResult<String> {
        let doc_id = request.doc_id().ok_or_else(|| {
            invalid_argument(format!(
                "'{}' is a collection; a document id is required",
                request.collection_path()
            ))
        })?;
        match &request.module_config().store.path {
            Some(path) => match split_module_path(path)? {
                (_, Some(_)) => Ok(path.clone()),
                (collection, None) => Ok(format!("{collection}/{doc_id}")),
            },
            None if self.options.use_module_paths => {
                Ok(format!("{}/{doc_id}", request.collection_path()))
            }
            None => Err(invalid_argument(format!(
                "no remote path configured for '{}/{doc_id}'",
                request.collection_path()
            ))),
        }
    }

    fn collection_path(&self, request: &PluginRequest) -> MagnetarResult<String> {
        match &request.module_config().store.path {
            Some(path) => match split_module_path(path)? {
                (collection, None) => Ok(collection),
                (_, Some(_)) => Err(invalid_argument(format!(
                    "remote path '{path}' of collection '{}' points at a document",
                    request.collection_path()
                ))),
            },
            None if self.options.use_module_paths => Ok(request.collection_path().to_string()),
            None => Err(invalid_argument(format!(
                "no remote path configured for '{}'",
                request.collection_path()
            ))),
        }
    }

    /// Per-call override, then the module setting, then the store default.
    fn debounce(&self, request: &PluginRequest) -> Duration {
        let millis = request
            .action_config
            .sync_debounce_ms
            .or(request.module_config().store.sync_debounce_ms)
            .unwrap_or(self.options.sync_debounce_ms);
        Duration::from_millis(millis)
    }

    fn payload_doc(action: ActionName, request: &PluginRequest) -> MagnetarResult<DocData> {
        request.payload.as_doc().cloned().ok_or_else(|| {
            invalid_argument(format!("{} needs a document payload", action.as_str()))
        })
    }

    async fn sync(&self, request: &PluginRequest, write: WriteOperation) -> MagnetarResult<()> {
        let debounce = self.debounce(request);
        LOGGER.debug(format!(
            "queueing write to '{}' ({}ms debounce)",
            write.path(),
            debounce.as_millis()
        ));
        self.batches
            .enqueue(request.collection_path(), write, debounce)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl StorePlugin for RemoteStore {
    async fn get(&self, request: PluginRequest) -> MagnetarResult<GetOutcome> {
        if request.doc_id().is_some() {
            let path = self.doc_path(&request)?;
            let docs = self
                .datastore
                .get_document(&path)
                .await?
                .into_iter()
                .map(|data| FetchedDoc {
                    id: request.doc_id().unwrap_or_default().to_string(),
                    data,
                })
                .collect();
            return Ok(GetOutcome::Response(GetResponse {
                docs,
                reached_end: true,
                cursor: None,
            }));
        }

        let collection_path = self.collection_path(&request)?;
        let start_after = match &request.payload {
            ActionPayload::StartAfter(cursor) => Some(cursor),
            _ => None,
        };
        let page = self
            .datastore
            .run_query(&collection_path, &request.module_config().clauses, start_after)
            .await?;
        LOGGER.debug(format!(
            "fetched {} document(s) from '{collection_path}'",
            page.docs.len()
        ));
        Ok(GetOutcome::Response(GetResponse {
            docs: page.docs,
            reached_end: page.reached_end,
            cursor: page.cursor,
        }))
    }

    async fn stream(
        &self,
        request: PluginRequest,
        sink: SharedSnapshotSink,
    ) -> MagnetarResult<StreamOutcome> {
        let target = match request.doc_id() {
            Some(_) => ListenTarget::Doc(self.doc_path(&request)?),
            None => ListenTarget::Query {
                collection_path: self.collection_path(&request)?,
                clauses: request.module_config().clauses.clone(),
            },
        };
        let listener = self.datastore.listen(target, sink).await?;
        Ok(StreamOutcome::Response(StreamResponse {
            close: listener.close,
            first_snapshot: listener.first_snapshot,
        }))
    }

    async fn insert(&self, request: PluginRequest) -> MagnetarResult<()> {
        let write = WriteOperation::Set {
            path: self.doc_path(&request)?,
            data: Self::payload_doc(ActionName::Insert, &request)?,
        };
        self.sync(&request, write).await
    }

    async fn merge(&self, request: PluginRequest) -> MagnetarResult<()> {
        let write = WriteOperation::Merge {
            path: self.doc_path(&request)?,
            data: Self::payload_doc(ActionName::Merge, &request)?,
        };
        self.sync(&request, write).await
    }

    async fn assign(&self, request: PluginRequest) -> MagnetarResult<()> {
        let write = WriteOperation::Assign {
            path: self.doc_path(&request)?,
            data: Self::payload_doc(ActionName::Assign, &request)?,
        };
        self.sync(&request, write).await
    }

    async fn replace(&self, request: PluginRequest) -> MagnetarResult<()> {
        let write = WriteOperation::Set {
            path: self.doc_path(&request)?,
            data: Self::payload_doc(ActionName::Replace, &request)?,
        };
        self.sync(&request, write).await
    }

    async fn delete_prop(&self, request: PluginRequest) -> MagnetarResult<()> {
        let ActionPayload::Props(fields) = &request.payload else {
            return Err(invalid_argument("deleteProp needs a list of field paths"));
        };
        let write = WriteOperation::DeleteFields {
            path: self.doc_path(&request)?,
            fields: fields.clone(),
        };
        self.sync(&request, write).await
    }

    async fn delete(&self, request: PluginRequest) -> MagnetarResult<()> {
        let write = WriteOperation::Delete {
            path: self.doc_path(&request)?,
        };
        self.sync(&request, write).await
    }

    async fn revert(&self, action: ActionName, request: PluginRequest) -> MagnetarResult<()> {
        // Failed batches never reached the datastore, so there is nothing to undo.
        LOGGER.debug(format!(
            "nothing to revert for {} on '{}'",
            action.as_str(),
            request.module.module_path()
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::StoreModuleConfig;
    use crate::engine::{ActionConfig, ModuleRequest, PluginModuleConfig};
    use crate::platform::runtime::sleep;
    use crate::test_support::doc;
    use serde_json::json;

    fn request(doc_id: Option<&str>, store: StoreModuleConfig, payload: ActionPayload) -> PluginRequest {
        PluginRequest {
            payload,
            module: ModuleRequest {
                collection_path: "pokedex".into(),
                doc_id: doc_id.map(str::to_string),
                module_config: PluginModuleConfig {
                    store,
                    clauses: Default::default(),
                },
            },
            action_config: ActionConfig::default(),
        }
    }

    fn store(datastore: &InMemoryRemoteDatastore, options: RemoteStoreOptions) -> RemoteStore {
        RemoteStore::new(Arc::new(datastore.clone()), options)
    }

    #[test]
    fn remote_paths_follow_configuration() {
        let datastore = InMemoryRemoteDatastore::new();
        let remote = store(&datastore, RemoteStoreOptions::default());

        let plain = request(Some("025"), StoreModuleConfig::default(), ActionPayload::Empty);
        assert_eq!(remote.doc_path(&plain).unwrap(), "pokedex/025");

        let moved = request(
            Some("025"),
            StoreModuleConfig::default().with_path("regions/kanto/pokedex"),
            ActionPayload::Empty,
        );
        assert_eq!(remote.doc_path(&moved).unwrap(), "regions/kanto/pokedex/025");

        let pinned = request(
            Some("025"),
            StoreModuleConfig::default().with_path("favourites/pikachu"),
            ActionPayload::Empty,
        );
        assert_eq!(remote.doc_path(&pinned).unwrap(), "favourites/pikachu");

        let strict = store(&datastore, RemoteStoreOptions::default().with_use_module_paths(false));
        let err = strict.doc_path(&plain).unwrap_err();
        assert_eq!(err.code_str(), "magnetar/invalid-argument");
    }

    #[test]
    fn debounce_prefers_call_then_module_then_default() {
        let datastore = InMemoryRemoteDatastore::new();
        let remote = store(&datastore, RemoteStoreOptions::default());
        let mut req = request(
            Some("025"),
            StoreModuleConfig::default().with_sync_debounce_ms(200),
            ActionPayload::Empty,
        );
        assert_eq!(remote.debounce(&req), Duration::from_millis(200));
        req.action_config = ActionConfig::default().with_sync_debounce_ms(0);
        assert_eq!(remote.debounce(&req), Duration::ZERO);
        req.module.module_config.store = StoreModuleConfig::default();
        req.action_config = ActionConfig::default();
        assert_eq!(remote.debounce(&req), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn rapid_writes_commit_as_one_batch() {
        let datastore = InMemoryRemoteDatastore::new();
        let remote = store(&datastore, RemoteStoreOptions::default().with_sync_debounce_ms(10));
        let pikachu = remote.insert(request(
            Some("025"),
            StoreModuleConfig::default(),
            ActionPayload::Doc(doc(json!({"name": "Pikachu"}))),
        ));
        let level = remote.merge(request(
            Some("025"),
            StoreModuleConfig::default(),
            ActionPayload::Doc(doc(json!({"level": 5}))),
        ));
        let eevee = remote.insert(request(
            Some("133"),
            StoreModuleConfig::default(),
            ActionPayload::Doc(doc(json!({"name": "Eevee"}))),
        ));
        let (pikachu, level, eevee) = tokio::join!(pikachu, level, eevee);
        assert!(pikachu.is_ok() && level.is_ok() && eevee.is_ok());

        let commits = datastore.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].len(), 2);
        assert_eq!(
            datastore.document("pokedex/025"),
            Some(doc(json!({"name": "Pikachu", "level": 5})))
        );
    }

    #[tokio::test]
    async fn writes_stay_queued_until_the_debounce_ends() {
        let datastore = InMemoryRemoteDatastore::new();
        let remote = Arc::new(store(&datastore, RemoteStoreOptions::default().with_sync_debounce_ms(40)));
        let insert = tokio::spawn({
            let remote = Arc::clone(&remote);
            async move {
                remote
                    .insert(request(
                        Some("025"),
                        StoreModuleConfig::default(),
                        ActionPayload::Doc(doc(json!({"name": "Pikachu"}))),
                    ))
                    .await
            }
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(remote.pending_writes("pokedex"), 1);
        assert!(datastore.commits().is_empty());

        insert.await.unwrap().unwrap();
        assert_eq!(remote.pending_writes("pokedex"), 0);
        assert_eq!(datastore.commits().len(), 1);
    }

    #[tokio::test]
    async fn get_returns_a_page_with_cursor() {
        let datastore = InMemoryRemoteDatastore::new()
            .with_document("pokedex/001", doc(json!({"name": "Bulbasaur"})))
            .with_document("pokedex/004", doc(json!({"name": "Charmander"})));
        let remote = store(&datastore, RemoteStoreOptions::default());
        let GetOutcome::Response(response) = remote
            .get(request(None, StoreModuleConfig::default(), ActionPayload::Empty))
            .await
            .unwrap()
        else {
            panic!("remote store must answer with documents");
        };
        assert_eq!(response.docs.len(), 2);
        assert!(response.reached_end);
        assert_eq!(response.cursor, Some(json!(["004"])));
    }
}
