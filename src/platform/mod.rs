pub mod runtime;

pub use runtime::{next_tick, sleep, spawn_detached};
