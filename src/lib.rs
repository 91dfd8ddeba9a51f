//! Feed cache and reconciliation engine.
//!
//! `orrery` subscribes to syndicated feeds, merges each fetch into a
//! durable per-feed cache, and serves a filtered, sorted, deduplicated
//! view of every cached entry for downstream rendering.
//!
//! The pieces, leaves first:
//!
//! - [`store`] — typed records over a namespaced durable string map,
//!   one SQLite file per feed.
//! - [`item`] — one cached entry: field merge and date resolution.
//! - [`channel`] — one cached feed: the incremental reconciliation
//!   algorithm.
//! - [`planet`] — the aggregator: cross-channel
//!   filter/sort/dedup/window queries and the refresh loop.
//! - [`feed`] — the fetch-side collaborators: HTTP retrieval and
//!   feed-rs mapping into the engine's entry shape.
//! - [`config`] — the TOML subscription list.

pub mod channel;
pub mod config;
pub mod feed;
pub mod item;
pub mod planet;
pub mod store;

pub use channel::{Channel, ChannelConfig};
pub use config::Config;
pub use item::{ChannelContext, NewsItem};
pub use planet::{AggregatedItem, ItemQuery, Planet};
