//! Test utilities shared across crate-level unit tests.

pub mod plugins;

pub use plugins::MockStore;

use serde_json::Value;

use crate::engine::DocData;

/// Builds a document from a `json!` object literal.
pub fn doc(value: Value) -> DocData {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
