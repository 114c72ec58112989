//! Store-agnostic documents and collections over several backing stores.
//!
//! A [`Magnetar`] instance owns a set of named store plugins (for example a fast
//! local cache and a slower remote database) and fans every read, write and
//! stream out to them in a configured order. Writes land optimistically in the
//! local store, are batched towards the remote store and are rolled back locally
//! when the remote write fails.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use magnetar::stores::remote::{InMemoryRemoteDatastore, RemoteStore, RemoteStoreOptions};
//! use magnetar::stores::SimpleStore;
//! use magnetar::{GlobalConfig, Magnetar};
//! use serde_json::json;
//!
//! # async fn run() -> magnetar::MagnetarResult<()> {
//! let datastore = Arc::new(InMemoryRemoteDatastore::new());
//! let config = GlobalConfig::new("local")
//!     .with_store("local", Arc::new(SimpleStore::new()))
//!     .with_store(
//!         "remote",
//!         Arc::new(RemoteStore::new(datastore, RemoteStoreOptions::default())),
//!     );
//! let magnetar = Magnetar::new(config)?;
//!
//! let pokedex = magnetar.collection("pokedex", None)?;
//! let pikachu = pokedex
//!     .insert(json!({"name": "Pikachu"}).as_object().cloned().unwrap(), None)
//!     .await?
//!     .into_done();
//! # let _ = pikachu;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod logger;
pub mod platform;
pub mod stores;
pub mod util;

pub use crate::engine::{
    ActionConfig, ActionKind, ActionName, ActionOutcome, CollectionHandle, DocData, DocHandle,
    EventListeners, ExecutionOrder, GlobalConfig, Magnetar, MagnetarError, MagnetarErrorCode,
    MagnetarResult, ModuleConfig, QueryClauses, StoreModuleConfig, StorePlugin,
};

#[cfg(test)]
pub(crate) mod test_support;
