//! The engine: watchers, merger, store writer, sync and hooks, wired
//! together over the typed dispatcher.

pub mod dispatcher;
pub mod hooks;
pub mod merger;
pub mod run;
pub mod scratch;
pub mod store;
pub mod sync;
pub mod watcher;

pub use dispatcher::Dispatcher;
pub use merger::Merger;
pub use run::{run, run_with_shutdown};
pub use store::{SearchQuery, Store, StoreError};
pub use watcher::WatcherConfig;
