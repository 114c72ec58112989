//! Live subscription bookkeeping per filter identifier.
//!
//! A registration moves through opening, active and closing. While it is
//! opening or active, further `open` calls for the same identifier share its
//! open future instead of subscribing again. Closing stops delivery right away
//! and removes the registration on the next scheduler tick, so snapshot
//! callbacks already in flight cannot bring a closed entry back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::engine::error::MagnetarResult;
use crate::engine::model::{identifier_module_path, is_within_path};
use crate::engine::plugin::CloseStreamFn;
use crate::logger::Logger;
use crate::platform::runtime::{next_tick, spawn_detached};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@magnetar/core"));

pub type OpenStreamFuture = Shared<BoxFuture<'static, MagnetarResult<()>>>;

/// What the stores handed back once every subscription in the chain was opened.
pub struct OpenedStream {
    pub close: CloseStreamFn,
    /// Settles when the first snapshot reached the local stores.
    pub first_snapshot: BoxFuture<'static, MagnetarResult<()>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Opening,
    Active,
    Closing,
}

struct StreamRegistration {
    id: u64,
    state: StreamState,
    close: Option<CloseStreamFn>,
    open: OpenStreamFuture,
}

#[derive(Clone, Default)]
pub struct StreamRegistry {
    entries: Arc<Mutex<HashMap<String, StreamRegistration>>>,
    next_id: Arc<AtomicU64>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open future of `filter_id`, subscribing through `start` only
    /// when no opening or active registration exists.
    pub fn open<F>(&self, filter_id: &str, start: F) -> OpenStreamFuture
    where
        F: FnOnce() -> BoxFuture<'static, MagnetarResult<OpenedStream>>,
    {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(filter_id) {
            if existing.state != StreamState::Closing {
                return existing.open.clone();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let registry = self.clone();
        let key = filter_id.to_string();
        let starting = start();
        let open = async move {
            let opened = match starting.await {
                Ok(opened) => opened,
                Err(err) => {
                    registry.discard(&key, id);
                    return Err(err);
                }
            };
            if let Some(close) = registry.activate(&key, id, opened.close) {
                // Closed while the stores were still subscribing.
                close();
                return Ok(());
            }
            let first_snapshot = opened.first_snapshot.await;
            if first_snapshot.is_err() {
                registry.close(&key);
            }
            first_snapshot
        }
        .boxed()
        .shared();

        entries.insert(
            filter_id.to_string(),
            StreamRegistration {
                id,
                state: StreamState::Opening,
                close: None,
                open: open.clone(),
            },
        );
        drop(entries);

        LOGGER.debug(format!("opening stream '{filter_id}'"));
        spawn_detached(open.clone().map(|_| ()));
        open
    }

    /// Stores the close function of an opening registration. Hands it back when
    /// the registration was closed or replaced in the meantime.
    fn activate(&self, filter_id: &str, id: u64, close: CloseStreamFn) -> Option<CloseStreamFn> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(filter_id) {
            Some(entry) if entry.id == id && entry.state == StreamState::Opening => {
                entry.state = StreamState::Active;
                entry.close = Some(close);
                None
            }
            _ => Some(close),
        }
    }

    fn discard(&self, filter_id: &str, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(filter_id).is_some_and(|entry| entry.id == id) {
            entries.remove(filter_id);
        }
    }

    /// Stops the stream of `filter_id`. Returns `false` when nothing was open.
    pub fn close(&self, filter_id: &str) -> bool {
        let (id, close) = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(filter_id) else {
                return false;
            };
            if entry.state == StreamState::Closing {
                return false;
            }
            entry.state = StreamState::Closing;
            (entry.id, entry.close.take())
        };
        if let Some(close) = close {
            close();
        }
        LOGGER.debug(format!("closed stream '{filter_id}'"));

        let registry = self.clone();
        let key = filter_id.to_string();
        spawn_detached(async move {
            next_tick().await;
            registry.discard(&key, id);
            log::trace!("removed stream registration '{key}'");
        });
        true
    }

    /// Closes every stream whose module path equals `path_prefix` or is nested
    /// under it. Returns how many were closed.
    pub fn close_all(&self, path_prefix: &str) -> usize {
        let matching: Vec<String> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(id, entry)| {
                    entry.state != StreamState::Closing
                        && is_within_path(identifier_module_path(id), path_prefix)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        matching.iter().filter(|id| self.close(id)).count()
    }

    /// Every registered identifier that is not closing.
    pub fn open_identifiers(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.state != StreamState::Closing)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn state(&self, filter_id: &str) -> Option<StreamState> {
        self.entries
            .lock()
            .unwrap()
            .get(filter_id)
            .map(|entry| entry.state)
    }

    pub fn is_streaming(&self, filter_id: &str) -> bool {
        matches!(
            self.state(filter_id),
            Some(StreamState::Opening | StreamState::Active)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::store_action;
    use crate::platform::runtime::sleep;
    use futures::channel::oneshot;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Subscriptions {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl Subscriptions {
        fn new() -> Self {
            Self {
                opened: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn starter(&self) -> impl FnOnce() -> BoxFuture<'static, MagnetarResult<OpenedStream>> {
            let opened = Arc::clone(&self.opened);
            let closed = Arc::clone(&self.closed);
            move || {
                async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    Ok(OpenedStream {
                        close: Box::new(move || {
                            closed.fetch_add(1, Ordering::SeqCst);
                        }),
                        first_snapshot: async { Ok(()) }.boxed(),
                    })
                }
                .boxed()
            }
        }
    }

    const POKEDEX: &str = "pokedex /// {}";

    #[tokio::test]
    async fn concurrent_opens_share_one_subscription() {
        let registry = StreamRegistry::new();
        let subs = Subscriptions::new();
        let first = registry.open(POKEDEX, subs.starter());
        let second = registry.open(POKEDEX, subs.starter());

        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(subs.opened.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state(POKEDEX), Some(StreamState::Active));
    }

    #[tokio::test]
    async fn open_settles_after_the_first_snapshot() {
        let registry = StreamRegistry::new();
        let (deliver, delivered) = oneshot::channel::<()>();
        let open = registry.open(POKEDEX, move || {
            async move {
                Ok(OpenedStream {
                    close: Box::new(|| {}),
                    first_snapshot: async move {
                        let _ = delivered.await;
                        Ok(())
                    }
                    .boxed(),
                })
            }
            .boxed()
        });

        sleep(Duration::from_millis(10)).await;
        assert!(open.peek().is_none());
        assert!(registry.is_streaming(POKEDEX));
        deliver.send(()).unwrap();
        assert!(open.await.is_ok());
    }

    #[tokio::test]
    async fn close_stops_now_and_cleans_up_next_tick() {
        let registry = StreamRegistry::new();
        let subs = Subscriptions::new();
        registry.open(POKEDEX, subs.starter()).await.unwrap();

        assert!(registry.close(POKEDEX));
        assert_eq!(subs.closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state(POKEDEX), Some(StreamState::Closing));
        assert!(!registry.is_streaming(POKEDEX));
        assert!(!registry.close(POKEDEX));

        sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.state(POKEDEX), None);
    }

    #[tokio::test]
    async fn reopening_during_cleanup_keeps_new_registration() {
        let registry = StreamRegistry::new();
        let subs = Subscriptions::new();
        registry.open(POKEDEX, subs.starter()).await.unwrap();
        registry.close(POKEDEX);
        registry.open(POKEDEX, subs.starter()).await.unwrap();

        sleep(Duration::from_millis(5)).await;
        assert_eq!(subs.opened.load(Ordering::SeqCst), 2);
        assert_eq!(registry.state(POKEDEX), Some(StreamState::Active));
    }

    #[tokio::test]
    async fn close_while_opening_closes_once_subscribed() {
        let registry = StreamRegistry::new();
        let subs = Subscriptions::new();
        let open = registry.open(POKEDEX, subs.starter());
        assert!(registry.close(POKEDEX));
        assert!(open.await.is_ok());
        assert_eq!(subs.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_open_removes_registration() {
        let registry = StreamRegistry::new();
        let open = registry.open(POKEDEX, || {
            async { Err(store_action("remote", "permission denied")) }.boxed()
        });
        let err = open.await.unwrap_err();
        assert_eq!(err.store_name(), Some("remote"));
        assert_eq!(registry.state(POKEDEX), None);
    }

    #[tokio::test]
    async fn close_all_matches_nested_paths_only() {
        let registry = StreamRegistry::new();
        let subs = Subscriptions::new();
        for id in ["a/b /// {}", "a/b/c/d /// {}", "a/bc /// {}"] {
            registry.open(id, subs.starter()).await.unwrap();
        }

        assert_eq!(registry.close_all("a/b"), 2);
        assert!(!registry.is_streaming("a/b /// {}"));
        assert!(!registry.is_streaming("a/b/c/d /// {}"));
        assert!(registry.is_streaming("a/bc /// {}"));
        assert_eq!(registry.open_identifiers(), vec!["a/bc /// {}".to_string()]);
    }
}
