mod fetch_meta;
mod module_path;

pub use fetch_meta::FetchMetaData;
pub use module_path::{
    identifier_module_path, is_within_path, resolve_module, split_module_path, ModuleType,
    ResolvedModule, MODULE_IDENTIFIER_SPLIT,
};
