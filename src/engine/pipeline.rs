//! Runs one action through the configured stores.
//!
//! Every action first emits `before` for each store in the chain; an abort there
//! ends the call with [`ActionOutcome::Aborted`]. Writes then take the module's
//! write lock and visit the stores one at a time. When a store fails, the stores
//! that already applied the write are reverted newest first, the lock is
//! released, and the `error` and `revert` listeners run before the error is
//! returned. When every store succeeded, each is told to settle the write.

use std::sync::{Arc, LazyLock};

use futures::FutureExt;

use crate::engine::config::{ActionConfig, GlobalConfig, ModuleConfig};
use crate::engine::context::OrchestrationContext;
use crate::engine::error::{internal_error, invalid_argument, revert_error, MagnetarError, MagnetarResult};
use crate::engine::events::{AbortSignal, BeforeEvent, ErrorEvent, EventListeners, RevertEvent, SuccessEvent};
use crate::engine::model::{FetchMetaData, ModuleType, ResolvedModule};
use crate::engine::plugin::{
    ActionKind, ActionName, ActionPayload, CloseStreamFn, GetOutcome, ModuleData, ModuleRequest,
    PluginModuleConfig, PluginRequest, SinkFanout, SnapshotSink, StorePlugin, StreamOutcome,
};
use crate::engine::stream::{OpenStreamFuture, OpenedStream};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@magnetar/core"));

/// Result of an action that `before` listeners may cancel.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome<T> {
    Done(T),
    /// A `before` listener called `abort()`; no store ran.
    Aborted,
}

impl<T> ActionOutcome<T> {
    pub fn into_done(self) -> Option<T> {
        match self {
            ActionOutcome::Done(value) => Some(value),
            ActionOutcome::Aborted => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ActionOutcome::Aborted)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ActionOutcome<U> {
        match self {
            ActionOutcome::Done(value) => ActionOutcome::Done(f(value)),
            ActionOutcome::Aborted => ActionOutcome::Aborted,
        }
    }
}

type NamedStore = (String, Arc<dyn StorePlugin>);

/// A resolved module plus the options it was created with.
#[derive(Clone, Debug)]
pub(crate) struct ModuleScope {
    pub resolved: ResolvedModule,
    pub config: ModuleConfig,
}

impl ModuleScope {
    pub fn module_request(&self, store_name: &str) -> ModuleRequest {
        ModuleRequest {
            collection_path: self.resolved.collection_path.clone(),
            doc_id: self.resolved.doc_id.clone(),
            module_config: PluginModuleConfig {
                store: self.config.store_config(store_name),
                clauses: self.config.clauses.clone(),
            },
        }
    }

    fn plugin_request(
        &self,
        store_name: &str,
        payload: &ActionPayload,
        action_config: &ActionConfig,
    ) -> PluginRequest {
        PluginRequest {
            payload: payload.clone(),
            module: self.module_request(store_name),
            action_config: action_config.clone(),
        }
    }
}

/// Attributes a store failure to the store and payload it came from.
fn attribute(err: MagnetarError, store_name: &str, payload: &ActionPayload) -> MagnetarError {
    let err = err.with_store(store_name);
    if err.payload().is_some() {
        err
    } else {
        err.with_payload(payload.to_value())
    }
}

async fn dispatch_write(
    plugin: &dyn StorePlugin,
    action: ActionName,
    request: PluginRequest,
) -> MagnetarResult<()> {
    match action {
        ActionName::Insert => plugin.insert(request).await,
        ActionName::Merge => plugin.merge(request).await,
        ActionName::Assign => plugin.assign(request).await,
        ActionName::Replace => plugin.replace(request).await,
        ActionName::DeleteProp => plugin.delete_prop(request).await,
        ActionName::Delete => plugin.delete(request).await,
        ActionName::Get | ActionName::Stream => Err(internal_error(format!(
            "'{}' is not a write action",
            action.as_str()
        ))),
    }
}

pub(crate) struct ActionRun<'a> {
    pub config: &'a GlobalConfig,
    pub context: &'a OrchestrationContext,
    pub module: &'a ModuleScope,
}

impl ActionRun<'_> {
    fn listeners(&self, action_config: &ActionConfig) -> EventListeners {
        EventListeners::aggregate([&self.config.on, &self.module.config.on, &action_config.on])
    }

    fn store_chain(&self, kind: ActionKind, action_config: &ActionConfig) -> MagnetarResult<Vec<NamedStore>> {
        let names = match &action_config.execution_order {
            Some(order) => order.clone(),
            None => self.config.resolved_order(kind),
        };
        names
            .into_iter()
            .map(|name| {
                let plugin = self.config.store(&name).cloned().ok_or_else(|| {
                    invalid_argument(format!("execution order names unknown store '{name}'"))
                })?;
                Ok((name, plugin))
            })
            .collect()
    }

    /// Emits `before` for each store. Returns `true` once a listener aborted.
    fn run_before(
        listeners: &EventListeners,
        payload: &ActionPayload,
        action: ActionName,
        chain: &[NamedStore],
    ) -> bool {
        let signal = AbortSignal::default();
        for (store_name, _) in chain {
            listeners.emit_before(&BeforeEvent::new(payload, action, store_name, &signal));
            if signal.is_aborted() {
                return true;
            }
        }
        false
    }

    /// Current data of the module in the local store.
    pub fn local_data(&self) -> Option<ModuleData> {
        let local = self.config.local_store()?;
        local.get_module_data(&self.module.module_request(&self.config.local_store_name))
    }

    fn emit_success(
        &self,
        listeners: &EventListeners,
        chain: &[NamedStore],
        payload: &ActionPayload,
        action: ActionName,
        result: Option<&ModuleData>,
    ) {
        for (store_name, _) in chain {
            listeners.emit_success(&SuccessEvent {
                payload,
                action_name: action,
                store_name,
                result,
            });
        }
    }

    /// Runs a write or delete action through the store chain.
    pub async fn write(
        &self,
        action: ActionName,
        payload: ActionPayload,
        action_config: ActionConfig,
    ) -> MagnetarResult<ActionOutcome<Option<ModuleData>>> {
        let module_path = self.module.resolved.module_path();
        let listeners = self.listeners(&action_config);
        let chain = self.store_chain(action.kind(), &action_config)?;
        if Self::run_before(&listeners, &payload, action, &chain) {
            LOGGER.debug(format!("{} on '{module_path}' aborted", action.as_str()));
            return Ok(ActionOutcome::Aborted);
        }

        let lock = self.context.write_lock(&module_path);
        let guard = lock.lock_arc().await;

        let mut applied: Vec<&NamedStore> = Vec::with_capacity(chain.len());
        let mut failure = None;
        for named in &chain {
            let (store_name, plugin) = named;
            let request = self.module.plugin_request(store_name, &payload, &action_config);
            match dispatch_write(plugin.as_ref(), action, request).await {
                Ok(()) => applied.push(named),
                Err(err) => {
                    failure = Some(attribute(err, store_name, &payload));
                    break;
                }
            }
        }

        let Some(error) = failure else {
            for (store_name, plugin) in &applied {
                let request = self.module.plugin_request(store_name, &payload, &action_config);
                plugin.settle(action, &request);
            }
            drop(guard);
            let result = self.local_data();
            self.emit_success(&listeners, &chain, &payload, action, result.as_ref());
            return Ok(ActionOutcome::Done(result));
        };

        LOGGER.warn(format!(
            "{} on '{module_path}' failed, reverting {} store(s): {error}",
            action.as_str(),
            applied.len()
        ));
        let mut reverted = Vec::with_capacity(applied.len());
        let mut revert_failures = Vec::new();
        for (store_name, plugin) in applied.into_iter().rev() {
            let request = self.module.plugin_request(store_name, &payload, &action_config);
            match plugin.revert(action, request).await {
                Ok(()) => reverted.push(store_name.as_str()),
                Err(err) => {
                    let err = revert_error(
                        store_name,
                        format!("reverting {} failed: {}", action.as_str(), err.message()),
                    )
                    .with_payload(payload.to_value());
                    LOGGER.error(format!("{err}"));
                    revert_failures.push(err);
                }
            }
        }
        drop(guard);

        let failed_store = error.store_name().unwrap_or_default();
        listeners.emit_error(&ErrorEvent {
            payload: &payload,
            action_name: action,
            store_name: failed_store,
            error: &error,
        });
        for revert_failure in &revert_failures {
            listeners.emit_error(&ErrorEvent {
                payload: &payload,
                action_name: action,
                store_name: revert_failure.store_name().unwrap_or_default(),
                error: revert_failure,
            });
        }

        let result = self.local_data();
        for store_name in reverted {
            listeners.emit_revert(&RevertEvent {
                payload: &payload,
                action_name: action,
                store_name,
                result: result.as_ref(),
            });
        }
        Err(error)
    }

    /// Fetches the module from every store in the read chain. Documents returned by
    /// a store are handed to the sinks of the stores before it.
    pub async fn get(
        &self,
        payload: ActionPayload,
        action_config: ActionConfig,
    ) -> MagnetarResult<ActionOutcome<Option<ModuleData>>> {
        let listeners = self.listeners(&action_config);
        let chain = self.store_chain(ActionKind::Read, &action_config)?;
        if Self::run_before(&listeners, &payload, ActionName::Get, &chain) {
            LOGGER.debug(format!("get on '{}' aborted", self.module.resolved.module_path()));
            return Ok(ActionOutcome::Aborted);
        }

        let mut fanout = SinkFanout::default();
        let mut fetch_meta = None;
        for (store_name, plugin) in &chain {
            let request = self.module.plugin_request(store_name, &payload, &action_config);
            let plugin = Arc::clone(plugin);
            let fetch = move || async move { plugin.get(request).await }.boxed();
            // Pages are never shared; only plain fetches of the same filter are.
            let outcome = match &payload {
                ActionPayload::StartAfter(_) => fetch().await,
                _ => {
                    self.context
                        .shared_fetch(&self.module.resolved.filter_id, store_name, fetch)
                        .await
                }
            };
            match outcome {
                Ok(GetOutcome::Sink(sink)) => fanout.push(sink),
                Ok(GetOutcome::Response(response)) => {
                    for doc in &response.docs {
                        fanout.added(&doc.id, doc.data.clone());
                    }
                    fetch_meta = Some(FetchMetaData {
                        reached_end: response.reached_end,
                        cursor: response.cursor,
                    });
                }
                Err(err) => {
                    let err = attribute(err, store_name, &payload);
                    LOGGER.warn(format!("get failed: {err}"));
                    listeners.emit_error(&ErrorEvent {
                        payload: &payload,
                        action_name: ActionName::Get,
                        store_name,
                        error: &err,
                    });
                    return Err(err);
                }
            }
        }

        if let (Some(meta), ModuleType::Collection) = (fetch_meta, self.module.resolved.module_type()) {
            self.context
                .set_fetch_meta(&self.module.resolved.where_order_by_id, meta);
        }
        let result = self.local_data();
        self.emit_success(&listeners, &chain, &payload, ActionName::Get, result.as_ref());
        Ok(ActionOutcome::Done(result))
    }

    /// Opens, or joins, the module's stream. The returned future settles once the
    /// first snapshot reached the local stores. Streams cannot be aborted.
    pub fn stream(&self, action_config: ActionConfig) -> MagnetarResult<OpenStreamFuture> {
        let payload = ActionPayload::Empty;
        let listeners = self.listeners(&action_config);
        let chain = self.store_chain(ActionKind::Read, &action_config)?;
        if Self::run_before(&listeners, &payload, ActionName::Stream, &chain) {
            LOGGER.debug("abort() has no effect on streams");
        }

        let module = self.module.clone();
        let filter_id = module.resolved.filter_id.clone();
        let start = move || {
            async move {
                let mut fanout = SinkFanout::default();
                let mut closers: Vec<CloseStreamFn> = Vec::new();
                let mut first_snapshots = Vec::new();
                for (store_name, plugin) in &chain {
                    let request = module.plugin_request(store_name, &payload, &action_config);
                    match plugin.stream(request, Arc::new(fanout.clone())).await {
                        Ok(StreamOutcome::Sink(sink)) => fanout.push(sink),
                        Ok(StreamOutcome::Response(response)) => {
                            closers.push(response.close);
                            first_snapshots.push(response.first_snapshot);
                        }
                        Err(err) => {
                            for close in closers {
                                close();
                            }
                            let err = attribute(err, store_name, &payload);
                            LOGGER.warn(format!("stream failed to open: {err}"));
                            listeners.emit_error(&ErrorEvent {
                                payload: &payload,
                                action_name: ActionName::Stream,
                                store_name,
                                error: &err,
                            });
                            return Err(err);
                        }
                    }
                }

                let first_snapshot = async move {
                    let delivered = futures::future::try_join_all(first_snapshots).await;
                    if let Err(err) = &delivered {
                        listeners.emit_error(&ErrorEvent {
                            payload: &payload,
                            action_name: ActionName::Stream,
                            store_name: err.store_name().unwrap_or_default(),
                            error: err,
                        });
                    }
                    delivered.map(|_| ())
                }
                .boxed();
                let close: CloseStreamFn = Box::new(move || {
                    for close in closers {
                        close();
                    }
                });
                Ok(OpenedStream {
                    close,
                    first_snapshot,
                })
            }
            .boxed()
        };
        Ok(self.context.streams().open(&filter_id, start))
    }
}
