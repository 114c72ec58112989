use std::sync::Arc;

use crate::engine::api::{derived_config, CollectionHandle, Magnetar};
use crate::engine::config::ActionConfig;
use crate::engine::error::MagnetarResult;
use crate::engine::model::split_module_path;
use crate::engine::pipeline::{ActionOutcome, ModuleScope};
use crate::engine::plugin::{ActionName, ActionPayload, DocData, ModuleData};

/// A document module: a path with an even number of segments.
///
/// Write methods resolve with the local document after the write, or
/// [`ActionOutcome::Aborted`] when a `before` listener cancelled the call.
#[derive(Clone)]
pub struct DocHandle {
    magnetar: Magnetar,
    scope: Arc<ModuleScope>,
}

type DocOutcome = MagnetarResult<ActionOutcome<Option<DocData>>>;

impl DocHandle {
    pub(crate) fn new(magnetar: Magnetar, scope: Arc<ModuleScope>) -> Self {
        Self { magnetar, scope }
    }

    pub fn id(&self) -> &str {
        self.scope.resolved.doc_id.as_deref().unwrap_or_default()
    }

    pub fn collection_path(&self) -> &str {
        &self.scope.resolved.collection_path
    }

    pub fn path(&self) -> String {
        self.scope.resolved.module_path()
    }

    /// A sub-collection of this document.
    pub fn collection(&self, name: &str) -> MagnetarResult<CollectionHandle> {
        let doc_id = self.id().to_string();
        let config = derived_config(&self.scope.config, |store_path| {
            match split_module_path(store_path) {
                Ok((_, Some(_))) => format!("{store_path}/{name}"),
                _ => format!("{store_path}/{doc_id}/{name}"),
            }
        });
        self.magnetar
            .collection(&format!("{}/{name}", self.path()), Some(config))
    }

    async fn write(
        &self,
        action: ActionName,
        payload: ActionPayload,
        action_config: Option<ActionConfig>,
    ) -> DocOutcome {
        let outcome = self
            .magnetar
            .inner()
            .run(&self.scope)
            .write(action, payload, action_config.unwrap_or_default())
            .await?;
        Ok(outcome.map(|data| data.and_then(ModuleData::into_doc)))
    }

    pub async fn insert(&self, data: DocData, action_config: Option<ActionConfig>) -> DocOutcome {
        self.write(ActionName::Insert, ActionPayload::Doc(data), action_config)
            .await
    }

    /// Deep-merges `data` into the document.
    pub async fn merge(&self, data: DocData, action_config: Option<ActionConfig>) -> DocOutcome {
        self.write(ActionName::Merge, ActionPayload::Doc(data), action_config)
            .await
    }

    /// Overwrites the top-level fields present in `data`.
    pub async fn assign(&self, data: DocData, action_config: Option<ActionConfig>) -> DocOutcome {
        self.write(ActionName::Assign, ActionPayload::Doc(data), action_config)
            .await
    }

    pub async fn replace(&self, data: DocData, action_config: Option<ActionConfig>) -> DocOutcome {
        self.write(ActionName::Replace, ActionPayload::Doc(data), action_config)
            .await
    }

    /// Removes dot-separated field paths.
    pub async fn delete_prop<I, S>(&self, props: I, action_config: Option<ActionConfig>) -> DocOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let props = props.into_iter().map(Into::into).collect();
        self.write(ActionName::DeleteProp, ActionPayload::Props(props), action_config)
            .await
    }

    pub async fn delete(&self, action_config: Option<ActionConfig>) -> DocOutcome {
        self.write(ActionName::Delete, ActionPayload::Empty, action_config)
            .await
    }

    pub async fn fetch(&self, action_config: Option<ActionConfig>) -> DocOutcome {
        let outcome = self
            .magnetar
            .inner()
            .run(&self.scope)
            .get(ActionPayload::Empty, action_config.unwrap_or_default())
            .await?;
        Ok(outcome.map(|data| data.and_then(ModuleData::into_doc)))
    }

    /// The local document, if any.
    pub fn data(&self) -> Option<DocData> {
        self.magnetar
            .inner()
            .run(&self.scope)
            .local_data()
            .and_then(ModuleData::into_doc)
    }

    /// Opens the stream of this document and waits for its first snapshot.
    pub async fn stream(&self, action_config: Option<ActionConfig>) -> MagnetarResult<()> {
        let opened = self
            .magnetar
            .inner()
            .run(&self.scope)
            .stream(action_config.unwrap_or_default())?;
        opened.await
    }

    pub fn streaming(&self) -> bool {
        self.magnetar
            .inner()
            .context()
            .streams()
            .is_streaming(&self.scope.resolved.filter_id)
    }

    pub fn close_stream(&self) -> bool {
        self.magnetar
            .inner()
            .context()
            .streams()
            .close(&self.scope.resolved.filter_id)
    }

    /// Closes the stream of this document and of every sub-collection below it.
    pub fn close_all_streams(&self) -> usize {
        self.magnetar
            .inner()
            .context()
            .streams()
            .close_all(&self.path())
    }
}
