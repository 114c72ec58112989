use std::sync::{Arc, LazyLock};

use crate::engine::api::{CollectionHandle, DocHandle};
use crate::engine::config::{GlobalConfig, ModuleConfig};
use crate::engine::context::OrchestrationContext;
use crate::engine::error::MagnetarResult;
use crate::engine::model::{resolve_module, ModuleType};
use crate::engine::pipeline::{ActionRun, ModuleScope};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@magnetar/core"));

pub(crate) struct MagnetarInner {
    config: GlobalConfig,
    context: OrchestrationContext,
}

impl MagnetarInner {
    pub(crate) fn run<'a>(&'a self, module: &'a ModuleScope) -> ActionRun<'a> {
        ActionRun {
            config: &self.config,
            context: &self.context,
            module,
        }
    }

    pub(crate) fn context(&self) -> &OrchestrationContext {
        &self.context
    }
}

/// Entry point: owns the stores and every registry shared by its handles.
///
/// Cloning is cheap; clones share state. Two separately constructed instances
/// never do.
#[derive(Clone)]
pub struct Magnetar {
    inner: Arc<MagnetarInner>,
}

impl Magnetar {
    pub fn new(config: GlobalConfig) -> MagnetarResult<Self> {
        config.validate()?;
        LOGGER.debug(format!(
            "created instance with {} store(s), local store '{}'",
            config.stores.len(),
            config.local_store_name
        ));
        Ok(Self {
            inner: Arc::new(MagnetarInner {
                config,
                context: OrchestrationContext::new(),
            }),
        })
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    pub fn collection(
        &self,
        path: &str,
        config: Option<ModuleConfig>,
    ) -> MagnetarResult<CollectionHandle> {
        let scope = self.module(path, ModuleType::Collection, config.unwrap_or_default())?;
        Ok(CollectionHandle::new(self.clone(), scope))
    }

    pub fn doc(&self, path: &str, config: Option<ModuleConfig>) -> MagnetarResult<DocHandle> {
        let scope = self.module(path, ModuleType::Doc, config.unwrap_or_default())?;
        Ok(DocHandle::new(self.clone(), scope))
    }

    /// Drops the local data of every collection a handle was created for,
    /// except those named in `exclude`. Locks, fetch state and streams stay.
    pub fn clear_all_data(&self, exclude: &[&str]) {
        let Some(local) = self.inner.config.local_store() else {
            return;
        };
        for collection_path in self.inner.context.collection_names() {
            if exclude.contains(&collection_path.as_str()) {
                continue;
            }
            local.clear_module_data(&collection_path);
        }
    }

    /// Closes every open stream of every known collection. Returns how many were closed.
    pub fn close_all_streams(&self) -> usize {
        let streams = self.inner.context.streams();
        self.inner
            .context
            .collection_names()
            .iter()
            .map(|collection_path| streams.close_all(collection_path))
            .sum()
    }

    pub(crate) fn inner(&self) -> &MagnetarInner {
        &self.inner
    }

    fn module(
        &self,
        path: &str,
        module_type: ModuleType,
        config: ModuleConfig,
    ) -> MagnetarResult<Arc<ModuleScope>> {
        let resolved = resolve_module(path, module_type, &config.clauses)?;
        self.inner
            .context
            .record_collection(&resolved.collection_path);
        let scope = ModuleScope { resolved, config };
        for (store_name, plugin) in &self.inner.config.stores {
            plugin.setup_module(&scope.module_request(store_name));
        }
        Ok(Arc::new(scope))
    }
}
