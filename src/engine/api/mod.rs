mod collection;
mod doc;
mod magnetar;

pub use collection::CollectionHandle;
pub use doc::DocHandle;
pub use magnetar::Magnetar;

use crate::engine::config::ModuleConfig;

/// Module options inherited by a handle derived from another one: per-store
/// options and listeners carry over, query clauses and initial data do not.
/// Configured store paths are rewritten through `rebase_path`.
fn derived_config<F>(parent: &ModuleConfig, rebase_path: F) -> ModuleConfig
where
    F: Fn(&str) -> String,
{
    let config_per_store = parent
        .config_per_store
        .iter()
        .map(|(store_name, store)| {
            let mut store = store.clone();
            store.initial_data = None;
            store.path = store.path.as_deref().map(&rebase_path);
            (store_name.clone(), store)
        })
        .collect();
    ModuleConfig {
        clauses: Default::default(),
        config_per_store,
        on: parent.on.clone(),
    }
}
