//! Bundled store plugins.

pub mod query_evaluator;
pub mod remote;
mod simple_store;

pub use simple_store::SimpleStore;
