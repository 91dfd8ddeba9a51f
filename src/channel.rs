//! One subscribed feed and its incremental reconciliation.
//!
//! A [`Channel`] owns the durable store for one feed URL, the typed
//! channel record in its root namespace, and the eagerly loaded set of
//! cached entries. [`Channel::apply`] reacts to a fetch outcome;
//! [`Channel::update_entries`] is the merge algorithm itself: identity
//! resolution, first-sync suppression, order assignment, and the
//! expiration sweep.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::feed::{parser, Detail, EntryField, FetchOutcome, FetchStatus, ParsedEntry};
use crate::item::{merge_detail, merge_scalar, ChannelContext, NewsItem};
use crate::store::{DiskStore, FieldValue, Record, StoreError, Timestamp, ROOT_NS};

// Feed-level keys that never merge into the channel record.
const IGNORE_KEYS: &[&str] = &[
    "links",
    "contributors",
    "textinput",
    "cloud",
    "categories",
    "url",
    "href",
    "etag",
    "last_modified",
    "tags",
    "itunes_explicit",
    "items",
    "entries",
];

/// Static per-feed configuration, from the subscription list.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub url: String,
    pub name: Option<String>,
    pub filter: Option<String>,
    pub exclude: Option<String>,
    pub hidden: bool,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

pub struct Channel {
    store: DiskStore,
    cache_dir: Option<PathBuf>,
    record: Record,
    items: HashMap<String, NewsItem>,
    expired: Vec<NewsItem>,
    url: String,
    configured_url: String,
    next_order: u64,
    filter: Option<Regex>,
    exclude: Option<Regex>,
    hidden: bool,
}

impl Channel {
    /// Open (or create) the channel's cache under `cache_dir` and load
    /// every cached entry.
    pub async fn open(cache_dir: &Path, config: ChannelConfig) -> Result<Self, StoreError> {
        let store = DiskStore::open(cache_dir, &config.url).await?;
        Self::from_store(store, Some(cache_dir.to_path_buf()), config).await
    }

    /// Channel over an in-memory store; nothing survives the process.
    pub async fn open_in_memory(config: ChannelConfig) -> Result<Self, StoreError> {
        let store = DiskStore::open_memory().await?;
        Self::from_store(store, None, config).await
    }

    async fn from_store(
        store: DiskStore,
        cache_dir: Option<PathBuf>,
        config: ChannelConfig,
    ) -> Result<Self, StoreError> {
        let mut corrupt = false;
        let mut record = match Record::load(store.clone(), ROOT_NS).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(feed = %config.url, error = %e, "channel cache unreadable, starting empty");
                corrupt = true;
                Record::new(store.clone(), ROOT_NS)
            }
        };

        let mut items = HashMap::new();
        match store.namespaces().await {
            Ok(ids) => {
                for id in ids {
                    match NewsItem::load(store.clone(), id.clone()).await {
                        Ok(item) => {
                            items.insert(id, item);
                        }
                        Err(e) => {
                            tracing::error!(feed = %config.url, entry = %id, error = %e, "cached entry unreadable, skipped");
                            corrupt = true;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(feed = %config.url, error = %e, "cached entries unreadable, skipped");
                corrupt = true;
            }
        }

        // A damaged cache must not wedge the feed: drop the validators
        // so the next fetch is unconditional and repopulates it.
        if corrupt {
            record.delete_key("etag");
            record.delete_key("last_modified");
        }

        // A moved feed leaves its current URL in the cache; keep the
        // configured one for log messages.
        let url = record
            .text("url")
            .map(str::to_string)
            .unwrap_or_else(|| config.url.clone());
        if !record.has("url") {
            record.set_string("url", &url);
        }

        if let Some(name) = &config.name {
            record.set_string("display_name", name);
        }
        if let Some(pattern) = &config.filter {
            record.set_string("filter_pattern", pattern);
        }
        if let Some(pattern) = &config.exclude {
            record.set_string("exclude_pattern", pattern);
        }

        let filter = record
            .text("filter_pattern")
            .and_then(|p| compile_filter(&url, "filter", p));
        let exclude = record
            .text("exclude_pattern")
            .and_then(|p| compile_filter(&url, "exclude", p));

        let next_order = match record.text("next_order") {
            Some(text) => text.parse().unwrap_or_else(|_| {
                tracing::warn!(feed = %url, value = %text, "unreadable next_order, restarting at 0");
                0
            }),
            None => 0,
        };

        Ok(Self {
            store,
            cache_dir,
            record,
            items,
            expired: Vec::new(),
            configured_url: config.url,
            url,
            next_order,
            filter,
            exclude,
            hidden: config.hidden,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn configured_url(&self) -> &str {
        &self.configured_url
    }

    /// Feed description for log output; includes the configured URL
    /// when the feed has moved so the message can be traced back to the
    /// subscription list.
    pub fn feed_information(&self) -> String {
        if self.url == self.configured_url {
            format!("<{}>", self.url)
        } else {
            format!("<{}> (formerly <{}>)", self.url, self.configured_url)
        }
    }

    /// Display name: configuration override, then feed-supplied name,
    /// then title.
    pub fn display_name(&self) -> &str {
        for key in ["display_name", "name", "title"] {
            if let Some(value) = self.record.text(key) {
                return value;
            }
        }
        ""
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden || self.record.has("hidden")
    }

    pub fn etag(&self) -> Option<&str> {
        self.record.text("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.record.text("last_modified")
    }

    pub fn http_status(&self) -> Option<u16> {
        self.record.text("http_status").and_then(|s| s.parse().ok())
    }

    /// A gone feed keeps its cache but is no longer fetched.
    pub fn is_gone(&self) -> bool {
        self.http_status() == Some(410)
    }

    pub fn updated(&self) -> Option<Timestamp> {
        self.record.date("updated")
    }

    pub fn last_updated(&self) -> Option<Timestamp> {
        self.record.date("last_updated")
    }

    pub fn next_order(&self) -> u64 {
        self.next_order
    }

    pub fn get(&self, key: &str) -> &FieldValue {
        self.record.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.record.keys()
    }

    /// Snapshot the channel state items read while merging.
    pub fn context(&self) -> ChannelContext {
        ChannelContext {
            updated: self.updated(),
            language: self.record.text("language").map(str::to_string),
        }
    }

    pub(crate) fn include_filter(&self) -> Option<&Regex> {
        self.filter.as_ref()
    }

    pub(crate) fn exclude_filter(&self) -> Option<&Regex> {
        self.exclude.as_ref()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_item(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get_item(&self, id: &str) -> Option<&NewsItem> {
        self.items.get(id)
    }

    pub fn get_item_mut(&mut self, id: &str) -> Option<&mut NewsItem> {
        self.items.get_mut(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &NewsItem> {
        self.items.values()
    }

    /// Entries newest-first.
    pub fn sorted_entries(&self, include_hidden: bool) -> Vec<&NewsItem> {
        let mut entries: Vec<&NewsItem> = self
            .items
            .values()
            .filter(|item| include_hidden || !item.hidden())
            .collect();
        entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        entries
    }

    /// React to one fetch outcome. Timeouts and errors leave the cache
    /// untouched; everything else ends with a durable flush.
    pub async fn apply(
        &mut self,
        outcome: FetchOutcome,
        now: Timestamp,
        new_feed_items: usize,
    ) -> Result<(), StoreError> {
        if let Some(status) = outcome.http_status {
            self.record.set_string("http_status", status.to_string());
        }

        match outcome.status.clone() {
            FetchStatus::Unchanged => {
                tracing::info!(feed = %self.feed_information(), "feed unchanged");
                Ok(())
            }
            FetchStatus::Gone => {
                tracing::info!(feed = %self.feed_information(), "feed gone");
                self.persist().await
            }
            FetchStatus::Timeout => {
                tracing::warn!(feed = %self.feed_information(), "feed timed out");
                Ok(())
            }
            FetchStatus::Error { status } => {
                tracing::error!(feed = %self.feed_information(), status, "error while updating feed");
                Ok(())
            }
            FetchStatus::Moved { url } => {
                tracing::warn!(from = %self.url, to = %url, "feed has moved");
                if let Some(cache_dir) = self.cache_dir.clone() {
                    if let Err(e) = self.store.hard_link_as(&cache_dir, &url).await {
                        tracing::warn!(feed = %url, error = %e, "could not link cache under new name");
                    }
                }
                self.url = url.clone();
                self.record.set_string("url", url);
                self.ingest(outcome, now, new_feed_items, false).await
            }
            FetchStatus::Fresh => self.ingest(outcome, now, new_feed_items, false).await,
            FetchStatus::RetainAll => self.ingest(outcome, now, new_feed_items, true).await,
        }
    }

    async fn ingest(
        &mut self,
        outcome: FetchOutcome,
        now: Timestamp,
        new_feed_items: usize,
        retain_all: bool,
    ) -> Result<(), StoreError> {
        tracing::info!(feed = %self.feed_information(), "updating feed");

        match outcome.etag {
            Some(etag) => {
                tracing::debug!(feed = %self.url, etag = %etag, "validator");
                self.record.set_string("etag", etag);
            }
            None => self.record.delete_key("etag"),
        }
        match outcome.last_modified {
            Some(last_modified) => {
                tracing::debug!(feed = %self.url, last_modified = %last_modified, "validator");
                self.record.set_string("last_modified", last_modified);
            }
            None => self.record.delete_key("last_modified"),
        }

        self.update_info(&outcome.feed.fields);
        self.update_entries(&outcome.feed.entries, now, new_feed_items, retain_all);
        self.persist().await
    }

    /// Merge feed-level metadata into the channel record.
    pub fn update_info(&mut self, fields: &[(String, EntryField)]) {
        for (key, field) in fields {
            if IGNORE_KEYS.contains(&key.as_str()) {
                continue;
            }
            match field {
                EntryField::Date(when) => self.record.set_date(key, *when),
                EntryField::Detail(detail) => {
                    let base = key.strip_suffix("_detail").unwrap_or(key);
                    // Only name/email at feed level
                    let trimmed = Detail {
                        name: detail.name.clone(),
                        email: detail.email.clone(),
                        language: None,
                    };
                    merge_detail(&mut self.record, base, &trimmed, &ChannelContext::default());
                }
                EntryField::Image {
                    url,
                    link,
                    title,
                    width,
                    height,
                } => {
                    if let Some(url) = url {
                        self.record.set_string("image_url", url);
                    }
                    if let Some(link) = link {
                        self.record.set_string("image_link", link);
                    }
                    if let Some(title) = title {
                        self.record.set_string("image_title", title);
                    }
                    if let Some(width) = width {
                        self.record.set_string("image_width", width.to_string());
                    }
                    if let Some(height) = height {
                        self.record.set_string("image_height", height.to_string());
                    }
                }
                EntryField::Text { value, kind } => {
                    merge_scalar(&mut self.record, &self.url, key, value, kind.as_ref());
                }
                // Entry-only composites; a feed supplying them at the
                // top level is malformed.
                EntryField::Source { .. } | EntryField::Content(_) => {}
            }
        }
    }

    /// The core merge: resolve identities, update or create items,
    /// suppress a first sync's backlog, assign creation order, and
    /// expire entries that fell out of the feed.
    pub fn update_entries(
        &mut self,
        entries: &[ParsedEntry],
        now: Timestamp,
        new_feed_items: usize,
        retain_all: bool,
    ) {
        if entries.is_empty() {
            return;
        }

        let first_sync = self.updated().is_none();
        if let Some(previous) = self.updated() {
            self.record.set_date("last_updated", previous);
        }
        self.record.set_date("updated", now);
        let ctx = self.context();

        let mut new_ids: Vec<String> = Vec::new();
        let mut feed_ids: Vec<String> = Vec::new();
        for entry in entries {
            let Some(id) = parser::stable_id(&self.url, entry) else {
                tracing::error!(feed = %self.feed_information(), "unable to find or generate id, entry ignored");
                continue;
            };

            if !self.items.contains_key(&id) {
                self.items
                    .insert(id.clone(), NewsItem::create(self.store.clone(), id.clone()));
                new_ids.push(id.clone());
            }
            let Some(item) = self.items.get_mut(&id) else {
                continue;
            };
            item.update(entry, &ctx);
            feed_ids.push(id.clone());

            // Hide excess items the first time through
            if first_sync && new_feed_items > 0 && feed_ids.len() > new_feed_items {
                item.hide();
                tracing::debug!(feed = %self.url, entry = %id, "marked hidden (new feed)");
            }
        }

        // Assign order numbers in reverse, so feed order (typically
        // newest-first) becomes creation order (oldest-first).
        for id in new_ids.iter().rev() {
            self.next_order += 1;
            if let Some(item) = self.items.get_mut(id) {
                item.set_order(self.next_order);
            }
        }
        self.record
            .set_string("next_order", self.next_order.to_string());

        // Expiration sweep, newest first: every id the feed still
        // carries spends one unit of the remaining-count; an unmatched
        // item hit before the count runs out has been dropped or
        // replaced upstream. Stopping at zero bounds the sweep and
        // spares feeds that only publish a recent window.
        let feed_set: HashSet<&str> = feed_ids.iter().map(String::as_str).collect();
        let mut remaining = feed_ids.len();
        let mut sweep: Vec<(crate::item::SortKey, String)> = self
            .items
            .values()
            .map(|item| (item.sort_key(), item.id().to_string()))
            .collect();
        sweep.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id) in sweep {
            if remaining < 1 {
                break;
            }
            if feed_set.contains(id.as_str()) {
                remaining -= 1;
            } else if !retain_all {
                if let Some(item) = self.items.remove(&id) {
                    tracing::debug!(feed = %self.url, entry = %id, "removed expired or replaced item");
                    self.expired.push(item);
                }
            }
        }
    }

    /// Flush every touched item without syncing, clear expired items,
    /// then write the channel record and commit the whole batch in one
    /// transaction.
    pub async fn persist(&mut self) -> Result<(), StoreError> {
        for item in self.items.values_mut() {
            item.flush(false).await?;
        }
        let mut expired = std::mem::take(&mut self.expired);
        for item in &mut expired {
            item.clear(false).await?;
        }
        self.record.flush(true).await
    }
}

/// Case-insensitive filter compilation; an invalid pattern is logged
/// and ignored rather than taking the feed down.
pub(crate) fn compile_filter(owner: &str, role: &str, pattern: &str) -> Option<Regex> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            tracing::warn!(feed = %owner, role, pattern = %pattern, error = %e, "invalid filter pattern ignored");
            e
        })
        .ok()
}
