//! Durable per-feed cache storage.
//!
//! Each subscribed feed owns one SQLite file holding a namespaced
//! string map: `(namespace, key) -> (value, kind)`. The channel record
//! lives in the root namespace, each cached entry under its own id.
//! [`record::Record`] layers typed fields over that map.

mod date;
mod disk;
mod record;

pub use date::{DateError, Timestamp};
pub use disk::{cache_file_name, DiskStore, StoreOp};
pub use record::{FieldKind, FieldValue, Record, ROOT_NS};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid cached date for key {key:?}: {source}")]
    Date {
        key: String,
        #[source]
        source: DateError,
    },

    #[error("cache file error: {0}")]
    Io(#[from] std::io::Error),
}
