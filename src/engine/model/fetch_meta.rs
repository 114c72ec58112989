use serde_json::Value;

/// Pagination state of one where/orderBy combination.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchMetaData {
    pub reached_end: bool,
    /// Opaque position handed back to the store on the next page fetch.
    pub cursor: Option<Value>,
}
