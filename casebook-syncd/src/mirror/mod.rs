mod collection;
mod store;

pub use collection::Collection;
pub use store::{MirrorError, MirrorStore, Record, SyncMeta, SyncStatus, default_db_path};
