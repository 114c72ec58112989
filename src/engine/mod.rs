//! Orchestration of reads, writes and streams across several stores.

pub mod api;
pub mod backup;
pub mod batch_sync;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod plugin;
pub mod stream;

pub use api::{CollectionHandle, DocHandle, Magnetar};
pub use backup::{Backup, BackupRegistry, BackupStack};
pub use batch_sync::{BatchOperation, BatchSynchronizer, MAX_BATCH_OPERATIONS};
pub use config::{
    ActionConfig, ExecutionOrder, GlobalConfig, InitialData, ModuleConfig, OrderByClause,
    OrderDirection, QueryClauses, StoreModuleConfig, WhereClause, WhereFilterOp,
};
pub use context::OrchestrationContext;
pub use error::{MagnetarError, MagnetarErrorCode, MagnetarResult};
pub use events::{
    AbortSignal, BeforeEvent, ErrorEvent, EventListeners, EventName, RevertEvent, SuccessEvent,
};
pub use model::{resolve_module, FetchMetaData, ModuleType, ResolvedModule};
pub use pipeline::ActionOutcome;
pub use plugin::{
    ActionKind, ActionName, ActionPayload, CloseStreamFn, DocData, FetchedDoc, GetOutcome,
    GetResponse, ModuleData, ModuleRequest, PluginModuleConfig, PluginRequest,
    SharedSnapshotSink, SinkFanout, SnapshotSink, StorePlugin, StreamOutcome, StreamResponse,
};
pub use stream::{StreamRegistry, StreamState};
