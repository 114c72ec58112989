use std::sync::Arc;

use serde_json::Value;

use crate::engine::api::{derived_config, DocHandle, Magnetar};
use crate::engine::config::{
    ActionConfig, ModuleConfig, OrderByClause, OrderDirection, QueryClauses, WhereClause,
    WhereFilterOp,
};
use crate::engine::error::MagnetarResult;
use crate::engine::model::FetchMetaData;
use crate::engine::pipeline::{ActionOutcome, ModuleScope};
use crate::engine::plugin::{ActionPayload, DocData, ModuleData};
use crate::util::generate_auto_id;

/// A collection module: a path with an odd number of segments plus optional
/// query clauses.
#[derive(Clone)]
pub struct CollectionHandle {
    magnetar: Magnetar,
    scope: Arc<ModuleScope>,
}

impl CollectionHandle {
    pub(crate) fn new(magnetar: Magnetar, scope: Arc<ModuleScope>) -> Self {
        Self { magnetar, scope }
    }

    pub fn path(&self) -> &str {
        &self.scope.resolved.collection_path
    }

    /// Last segment of the path.
    pub fn id(&self) -> &str {
        let path = self.path();
        path.rsplit_once('/').map_or(path, |(_, id)| id)
    }

    pub fn clauses(&self) -> &QueryClauses {
        &self.scope.config.clauses
    }

    pub fn doc(&self, doc_id: &str) -> MagnetarResult<DocHandle> {
        let config = derived_config(&self.scope.config, str::to_string);
        self.magnetar
            .doc(&format!("{}/{doc_id}", self.path()), Some(config))
    }

    fn with_clauses(&self, update: impl FnOnce(&mut QueryClauses)) -> MagnetarResult<Self> {
        let mut config: ModuleConfig = self.scope.config.clone();
        update(&mut config.clauses);
        self.magnetar.collection(self.path(), Some(config))
    }

    pub fn where_field(
        &self,
        field: impl Into<String>,
        op: WhereFilterOp,
        value: Value,
    ) -> MagnetarResult<Self> {
        let clause = WhereClause {
            field: field.into(),
            op,
            value,
        };
        self.with_clauses(|clauses| clauses.where_clauses.push(clause))
    }

    pub fn order_by(&self, field: impl Into<String>, direction: OrderDirection) -> MagnetarResult<Self> {
        let clause = OrderByClause {
            field: field.into(),
            direction,
        };
        self.with_clauses(|clauses| clauses.order_by.push(clause))
    }

    pub fn limit(&self, limit: u32) -> MagnetarResult<Self> {
        self.with_clauses(|clauses| clauses.limit = Some(limit))
    }

    /// Inserts a new document. Its id is the payload's `id` field (string or
    /// number) when present, a generated one otherwise.
    pub async fn insert(
        &self,
        data: DocData,
        action_config: Option<ActionConfig>,
    ) -> MagnetarResult<ActionOutcome<DocHandle>> {
        let doc_id = match data.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => generate_auto_id(),
        };
        let doc = self.doc(&doc_id)?;
        let outcome = doc.insert(data, action_config).await?;
        Ok(outcome.map(|_| doc))
    }

    pub async fn delete(
        &self,
        doc_id: &str,
        action_config: Option<ActionConfig>,
    ) -> MagnetarResult<ActionOutcome<()>> {
        let outcome = self.doc(doc_id)?.delete(action_config).await?;
        Ok(outcome.map(|_| ()))
    }

    /// Fetches the collection from every read store and returns the local result.
    pub async fn fetch(
        &self,
        action_config: Option<ActionConfig>,
    ) -> MagnetarResult<ActionOutcome<Vec<(String, DocData)>>> {
        self.get(ActionPayload::Empty, action_config).await
    }

    /// Fetches the page after the last one fetched for the same where/orderBy
    /// combination. Once the end was reached, returns local data without
    /// contacting any store.
    pub async fn fetch_more(
        &self,
        action_config: Option<ActionConfig>,
    ) -> MagnetarResult<ActionOutcome<Vec<(String, DocData)>>> {
        let meta = self.fetch_meta();
        if meta.reached_end {
            return Ok(ActionOutcome::Done(self.data()));
        }
        let payload = match meta.cursor {
            Some(cursor) => ActionPayload::StartAfter(cursor),
            None => ActionPayload::Empty,
        };
        self.get(payload, action_config).await
    }

    async fn get(
        &self,
        payload: ActionPayload,
        action_config: Option<ActionConfig>,
    ) -> MagnetarResult<ActionOutcome<Vec<(String, DocData)>>> {
        let outcome = self
            .magnetar
            .inner()
            .run(&self.scope)
            .get(payload, action_config.unwrap_or_default())
            .await?;
        Ok(outcome.map(|data| data.map(ModuleData::into_docs).unwrap_or_default()))
    }

    pub fn fetch_meta(&self) -> FetchMetaData {
        self.magnetar
            .inner()
            .context()
            .fetch_meta(&self.scope.resolved.where_order_by_id)
    }

    /// Local documents matching the clauses.
    pub fn data(&self) -> Vec<(String, DocData)> {
        self.magnetar
            .inner()
            .run(&self.scope)
            .local_data()
            .map(ModuleData::into_docs)
            .unwrap_or_default()
    }

    /// Opens the stream of this collection and waits for its first snapshot.
    /// Joins the stream already open for the same clauses instead of opening another.
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

    /// Closes every stream of this collection and of anything nested below it.
    pub fn close_all_streams(&self) -> usize {
        self.magnetar
            .inner()
            .context()
            .streams()
            .close_all(self.path())
    }
}
