use crate::engine::config::QueryClauses;
use crate::engine::error::{invalid_path, MagnetarResult};

/// Separates the module path from the serialized clauses inside identifiers.
pub const MODULE_IDENTIFIER_SPLIT: &str = " /// ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Collection,
    Doc,
}

impl ModuleType {
    fn as_str(self) -> &'static str {
        match self {
            ModuleType::Collection => "collection",
            ModuleType::Doc => "doc",
        }
    }
}

/// Canonical identifiers of a module path plus its query options.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedModule {
    pub collection_path: String,
    pub doc_id: Option<String>,
    /// Module path + every clause; keys fetch dedup and stream registrations.
    pub filter_id: String,
    /// Module path + where/orderBy only; keys the pagination cursor cache.
    pub where_order_by_id: String,
}

impl ResolvedModule {
    pub fn module_path(&self) -> String {
        match &self.doc_id {
            Some(doc_id) => format!("{}/{}", self.collection_path, doc_id),
            None => self.collection_path.clone(),
        }
    }

    pub fn module_type(&self) -> ModuleType {
        if self.doc_id.is_some() {
            ModuleType::Doc
        } else {
            ModuleType::Collection
        }
    }
}

/// Validates `module_path` and splits off the trailing document id, if any.
pub fn split_module_path(module_path: &str) -> MagnetarResult<(String, Option<String>)> {
    if module_path.trim().is_empty() {
        return Err(invalid_path("module path must not be empty"));
    }
    if module_path.starts_with('/') || module_path.ends_with('/') {
        return Err(invalid_path(format!(
            "module path '{module_path}' must not start or end with '/'"
        )));
    }
    if module_path.contains("//") {
        return Err(invalid_path(format!(
            "module path '{module_path}' contains an empty segment"
        )));
    }

    let segment_count = module_path.split('/').count();
    if segment_count % 2 == 1 {
        return Ok((module_path.to_string(), None));
    }
    match module_path.rsplit_once('/') {
        Some((collection_path, doc_id)) => {
            Ok((collection_path.to_string(), Some(doc_id.to_string())))
        }
        None => Err(invalid_path(format!("module path '{module_path}' is malformed"))),
    }
}

/// Resolves a module path and its clauses into the identifiers used as registry keys.
///
/// Fails when the path is malformed or when its segment parity disagrees with
/// `module_type` (an odd count is a collection, an even count a document).
pub fn resolve_module(
    module_path: &str,
    module_type: ModuleType,
    clauses: &QueryClauses,
) -> MagnetarResult<ResolvedModule> {
    let (collection_path, doc_id) = split_module_path(module_path)?;
    let actual = if doc_id.is_some() {
        ModuleType::Doc
    } else {
        ModuleType::Collection
    };
    if actual != module_type {
        return Err(invalid_path(format!(
            "'{module_path}' is a {} path but a {} was requested",
            actual.as_str(),
            module_type.as_str()
        )));
    }

    let filter_id = format!(
        "{module_path}{MODULE_IDENTIFIER_SPLIT}{}",
        serde_json::to_string(clauses)?
    );
    let where_order_by_id = format!(
        "{module_path}{MODULE_IDENTIFIER_SPLIT}{}",
        serde_json::to_string(&clauses.without_limit())?
    );

    Ok(ResolvedModule {
        collection_path,
        doc_id,
        filter_id,
        where_order_by_id,
    })
}

/// The module path part of an identifier produced by [`resolve_module`].
pub fn identifier_module_path(identifier: &str) -> &str {
    identifier
        .split_once(MODULE_IDENTIFIER_SPLIT)
        .map(|(path, _)| path)
        .unwrap_or(identifier)
}

/// `true` when `path` equals `prefix` or is nested below it (`prefix/...`).
pub fn is_within_path(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
