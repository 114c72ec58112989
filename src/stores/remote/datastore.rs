use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::engine::batch_sync::BatchOperation;
use crate::engine::config::QueryClauses;
use crate::engine::error::MagnetarResult;
use crate::engine::{CloseStreamFn, DocData, FetchedDoc, SharedSnapshotSink};
use crate::util::{assign_fields, deep_merge, remove_field_path};

/// One write inside a committed batch. Paths are full document paths.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    /// Creates or overwrites the document.
    Set { path: String, data: DocData },
    /// Deep-merges into the document, creating it when missing.
    Merge { path: String, data: DocData },
    /// Overwrites top-level fields, creating the document when missing.
    Assign { path: String, data: DocData },
    /// Removes dot-separated field paths from an existing document.
    DeleteFields { path: String, fields: Vec<String> },
    Delete { path: String },
}

impl WriteOperation {
    pub fn path(&self) -> &str {
        match self {
            WriteOperation::Set { path, .. }
            | WriteOperation::Merge { path, .. }
            | WriteOperation::Assign { path, .. }
            | WriteOperation::DeleteFields { path, .. }
            | WriteOperation::Delete { path } => path,
        }
    }
}

impl BatchOperation for WriteOperation {
    fn target(&self) -> &str {
        self.path()
    }

    fn absorb(&mut self, next: Self) -> Result<(), Self> {
        match (self, next) {
            (current, next @ (WriteOperation::Set { .. } | WriteOperation::Delete { .. })) => {
                *current = next;
                Ok(())
            }
            (
                WriteOperation::Set { data, .. } | WriteOperation::Merge { data, .. },
                WriteOperation::Merge { data: incoming, .. },
            ) => {
                deep_merge(data, &incoming);
                Ok(())
            }
            (
                WriteOperation::Set { data, .. } | WriteOperation::Assign { data, .. },
                WriteOperation::Assign { data: incoming, .. },
            ) => {
                assign_fields(data, &incoming);
                Ok(())
            }
            (WriteOperation::Set { data, .. }, WriteOperation::DeleteFields { fields, .. }) => {
                for field in &fields {
                    remove_field_path(data, field);
                }
                Ok(())
            }
            (
                WriteOperation::DeleteFields { fields, .. },
                WriteOperation::DeleteFields { fields: incoming, .. },
            ) => {
                fields.extend(incoming);
                Ok(())
            }
            (_, next) => Err(next),
        }
    }
}

/// One page of a collection query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPage {
    pub docs: Vec<FetchedDoc>,
    pub reached_end: bool,
    /// Position after the last document, for the next page.
    pub cursor: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListenTarget {
    Doc(String),
    Query {
        collection_path: String,
        clauses: QueryClauses,
    },
}

/// A live listener registered with a datastore.
pub struct Listener {
    pub close: CloseStreamFn,
    /// Settles once the initial results reached the sink.
    pub first_snapshot: BoxFuture<'static, MagnetarResult<()>>,
}

/// The persistence service behind [`RemoteStore`](super::RemoteStore).
#[async_trait]
pub trait RemoteDatastore: Send + Sync + 'static {
    async fn get_document(&self, path: &str) -> MagnetarResult<Option<DocData>>;

    async fn run_query(
        &self,
        collection_path: &str,
        clauses: &QueryClauses,
        start_after: Option<&Value>,
    ) -> MagnetarResult<QueryPage>;

    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<WriteOperation>) -> MagnetarResult<()>;

    /// Delivers the target's documents to `sink` until the listener is closed.
    async fn listen(&self, target: ListenTarget, sink: SharedSnapshotSink) -> MagnetarResult<Listener>;
}
