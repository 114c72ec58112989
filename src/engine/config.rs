use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::error::{invalid_argument, MagnetarResult};
use crate::engine::events::EventListeners;
use crate::engine::plugin::{ActionKind, DocData, StorePlugin};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhereFilterOp {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: String,
    pub op: WhereFilterOp,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderByClause {
    pub field: String,
    pub direction: OrderDirection,
}

/// Query options of a collection module. Opaque to the engine apart from being
/// part of the module identifiers; stores evaluate them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryClauses {
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub where_clauses: Vec<WhereClause>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderByClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl QueryClauses {
    /// The same clauses without `limit`, which never invalidates a cursor position.
    pub fn without_limit(&self) -> Self {
        Self {
            where_clauses: self.where_clauses.clone(),
            order_by: self.order_by.clone(),
            limit: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.where_clauses.is_empty() && self.order_by.is_empty() && self.limit.is_none()
    }
}

/// Data a local store seeds a module with the first time it is set up.
#[derive(Clone, Debug, PartialEq)]
pub enum InitialData {
    Doc(DocData),
    Collection(Vec<(String, DocData)>),
}

/// Per-store options of a single module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreModuleConfig {
    /// Where the store keeps this module, when it differs from the module path.
    pub path: Option<String>,
    pub initial_data: Option<InitialData>,
    /// Module default for the write debounce of batching stores.
    pub sync_debounce_ms: Option<u64>,
}

impl StoreModuleConfig {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_initial_data(mut self, data: InitialData) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn with_sync_debounce_ms(mut self, millis: u64) -> Self {
        self.sync_debounce_ms = Some(millis);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModuleConfig {
    pub clauses: QueryClauses,
    pub config_per_store: HashMap<String, StoreModuleConfig>,
    pub on: EventListeners,
}

impl ModuleConfig {
    pub fn with_store_config(mut self, store_name: impl Into<String>, config: StoreModuleConfig) -> Self {
        self.config_per_store.insert(store_name.into(), config);
        self
    }

    pub fn with_clauses(mut self, clauses: QueryClauses) -> Self {
        self.clauses = clauses;
        self
    }

    pub fn with_listeners(mut self, on: EventListeners) -> Self {
        self.on = on;
        self
    }

    pub fn store_config(&self, store_name: &str) -> StoreModuleConfig {
        self.config_per_store
            .get(store_name)
            .cloned()
            .unwrap_or_default()
    }
}

/// Options of a single action call.
#[derive(Clone, Debug, Default)]
pub struct ActionConfig {
    pub on: EventListeners,
    pub execution_order: Option<Vec<String>>,
    /// Overrides the module's debounce for this call only.
    pub sync_debounce_ms: Option<u64>,
}

impl ActionConfig {
    pub fn with_listeners(mut self, on: EventListeners) -> Self {
        self.on = on;
        self
    }

    pub fn with_execution_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execution_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sync_debounce_ms(mut self, millis: u64) -> Self {
        self.sync_debounce_ms = Some(millis);
        self
    }
}

/// Store order per action category. An empty list falls back to the local store
/// followed by every other store in registration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    pub read: Vec<String>,
    pub write: Vec<String>,
    pub delete: Vec<String>,
}

impl ExecutionOrder {
    pub fn for_kind(&self, kind: ActionKind) -> &[String] {
        match kind {
            ActionKind::Read => &self.read,
            ActionKind::Write => &self.write,
            ActionKind::Delete => &self.delete,
        }
    }

    fn for_kind_mut(&mut self, kind: ActionKind) -> &mut Vec<String> {
        match kind {
            ActionKind::Read => &mut self.read,
            ActionKind::Write => &mut self.write,
            ActionKind::Delete => &mut self.delete,
        }
    }
}

#[derive(Clone)]
pub struct GlobalConfig {
    pub local_store_name: String,
    pub stores: Vec<(String, Arc<dyn StorePlugin>)>,
    pub execution_order: ExecutionOrder,
    pub on: EventListeners,
}

impl GlobalConfig {
    pub fn new(local_store_name: impl Into<String>) -> Self {
        Self {
            local_store_name: local_store_name.into(),
            stores: Vec::new(),
            execution_order: ExecutionOrder::default(),
            on: EventListeners::default(),
        }
    }

    pub fn with_store(mut self, name: impl Into<String>, plugin: Arc<dyn StorePlugin>) -> Self {
        self.stores.push((name.into(), plugin));
        self
    }

    pub fn with_execution_order<I, S>(mut self, kind: ActionKind, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.execution_order.for_kind_mut(kind) = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_listeners(mut self, on: EventListeners) -> Self {
        self.on = on;
        self
    }

    pub fn store(&self, name: &str) -> Option<&Arc<dyn StorePlugin>> {
        self.stores
            .iter()
            .find(|(store_name, _)| store_name == name)
            .map(|(_, plugin)| plugin)
    }

    pub fn local_store(&self) -> Option<&Arc<dyn StorePlugin>> {
        self.store(&self.local_store_name)
    }

    /// The store order used for `kind` when a call does not override it.
    pub fn resolved_order(&self, kind: ActionKind) -> Vec<String> {
        let configured = self.execution_order.for_kind(kind);
        if !configured.is_empty() {
            return configured.to_vec();
        }
        let mut order = Vec::with_capacity(self.stores.len());
        if self.local_store().is_some() {
            order.push(self.local_store_name.clone());
        }
        order.extend(
            self.stores
                .iter()
                .map(|(name, _)| name.clone())
                .filter(|name| name != &self.local_store_name),
        );
        order
    }

    pub(crate) fn validate(&self) -> MagnetarResult<()> {
        if self.stores.is_empty() {
            return Err(invalid_argument("at least one store must be registered"));
        }
        for (index, (name, _)) in self.stores.iter().enumerate() {
            if self.stores[..index].iter().any(|(other, _)| other == name) {
                return Err(invalid_argument(format!("store '{name}' registered twice")));
            }
        }
        if self.local_store().is_none() {
            return Err(invalid_argument(format!(
                "local store '{}' is not registered",
                self.local_store_name
            )));
        }
        for kind in [ActionKind::Read, ActionKind::Write, ActionKind::Delete] {
            self.validate_order(self.execution_order.for_kind(kind))?;
        }
        Ok(())
    }

    pub(crate) fn validate_order(&self, order: &[String]) -> MagnetarResult<()> {
        match order.iter().find(|name| self.store(name).is_none()) {
            Some(unknown) => Err(invalid_argument(format!(
                "execution order names unknown store '{unknown}'"
            ))),
            None => Ok(()),
        }
    }
}

impl Debug for GlobalConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stores.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("GlobalConfig")
            .field("local_store_name", &self.local_store_name)
            .field("stores", &names)
            .field("execution_order", &self.execution_order)
            .field("on", &self.on)
            .finish()
    }
}
