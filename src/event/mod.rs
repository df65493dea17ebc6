pub mod harvester;
pub mod queue;
pub mod watcher;

pub use harvester::DirectoryHarvester;
pub use queue::{DelayQueue, DelayedFileGroup};
pub use watcher::{Change, EventWatcher};
