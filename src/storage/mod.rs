pub mod history;
pub mod id_store;
pub mod locks;

pub use history::HistoryStore;
pub use id_store::{EnvelopeFn, PathIdStore};
pub use locks::{LockRegistry, SharedLock};
