//! The aggregator: a set of channels and the combined item view.

use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashSet;

use crate::channel::{compile_filter, Channel};
use crate::feed::fetcher::{self, FetchConfig};
use crate::feed::FetchOutcome;
use crate::item::NewsItem;
use crate::store::Timestamp;

/// Seconds per day for the max-days window.
pub const DAY_SECS: i64 = 86_400;

/// Selection and shaping options for [`Planet::items`].
#[derive(Debug, Clone)]
pub struct ItemQuery {
    /// Include hidden channels and hidden items.
    pub include_hidden: bool,
    /// Sort newest-first. Required for `max_days` to apply.
    pub sorted: bool,
    /// Keep at most this many items; 0 keeps all.
    pub max_items: usize,
    /// Drop items more than this many days older than the newest;
    /// 0 keeps all.
    pub max_days: i64,
    /// Restrict to these feed URLs, in the given order. `None` selects
    /// every visible channel in display-name order.
    pub channels: Option<Vec<String>>,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            include_hidden: false,
            sorted: true,
            max_items: 0,
            max_days: 0,
            channels: None,
        }
    }
}

/// One aggregated entry with the channel it came from.
pub struct AggregatedItem<'a> {
    pub channel: &'a Channel,
    pub item: &'a NewsItem,
}

#[derive(Default)]
pub struct Planet {
    channels: Vec<Channel>,
    filter: Option<Regex>,
    exclude: Option<Regex>,
    new_feed_items: usize,
}

impl Planet {
    /// `new_feed_items` is the first-sync visibility threshold handed
    /// to every channel update; 0 disables the suppression.
    pub fn new(new_feed_items: usize) -> Self {
        Self {
            new_feed_items,
            ..Self::default()
        }
    }

    /// Install the aggregation-wide include/exclude patterns.
    pub fn with_filters(mut self, filter: Option<&str>, exclude: Option<&str>) -> Self {
        self.filter = filter.and_then(|p| compile_filter("planet", "filter", p));
        self.exclude = exclude.and_then(|p| compile_filter("planet", "exclude", p));
        self
    }

    pub fn subscribe(&mut self, channel: Channel) {
        self.channels.push(channel);
    }

    pub fn unsubscribe(&mut self, url: &str) -> Option<Channel> {
        let index = self
            .channels
            .iter()
            .position(|c| c.configured_url() == url || c.url() == url)?;
        Some(self.channels.remove(index))
    }

    pub fn find_channel(&self, url: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| c.configured_url() == url || c.url() == url)
    }

    pub fn find_channel_mut(&mut self, url: &str) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|c| c.configured_url() == url || c.url() == url)
    }

    /// Channels, optionally with hidden ones, optionally in
    /// display-name order.
    pub fn channels(&self, include_hidden: bool, sorted: bool) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self
            .channels
            .iter()
            .filter(|c| include_hidden || !c.is_hidden())
            .collect();
        if sorted {
            channels.sort_by(|a, b| a.display_name().cmp(b.display_name()));
        }
        channels
    }

    /// The combined item view.
    ///
    /// Filters apply in a fixed order: item/channel visibility, the
    /// aggregation-wide include and exclude patterns, then the owning
    /// channel's include and exclude patterns — includes must match,
    /// either exclude rejects. Ids are deduplicated globally, first
    /// channel in iteration order winning, before sorting, truncation,
    /// and the max-days window.
    pub fn items(&self, query: &ItemQuery) -> Vec<AggregatedItem<'_>> {
        let selected: Vec<&Channel> = match &query.channels {
            Some(urls) => urls.iter().filter_map(|url| self.find_channel(url)).collect(),
            None => self.channels(query.include_hidden, true),
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut collected: Vec<(crate::item::SortKey, AggregatedItem<'_>)> = Vec::new();
        for channel in selected {
            for item in channel.entries() {
                if !query.include_hidden && item.hidden() {
                    continue;
                }

                let title = item.text("title").unwrap_or("");
                let content = item.content();
                let matches = |re: &Regex| re.is_match(title) || re.is_match(content);

                if let Some(re) = &self.filter {
                    if !matches(re) {
                        continue;
                    }
                }
                if let Some(re) = &self.exclude {
                    if matches(re) {
                        continue;
                    }
                }
                if let Some(re) = channel.include_filter() {
                    if !matches(re) {
                        continue;
                    }
                }
                if let Some(re) = channel.exclude_filter() {
                    if matches(re) {
                        continue;
                    }
                }

                if !seen.insert(item.id()) {
                    continue;
                }
                collected.push((item.sort_key(), AggregatedItem { channel, item }));
            }
        }

        if query.sorted {
            collected.sort_by(|a, b| b.0.cmp(&a.0));
        }

        if query.max_items > 0 {
            collected.truncate(query.max_items);
        }

        if query.max_days > 0 && query.sorted {
            if let Some((newest, _)) = collected.first() {
                let horizon = newest.epoch - query.max_days * DAY_SECS;
                if let Some(cut) = collected.iter().position(|(key, _)| key.epoch <= horizon) {
                    collected.truncate(cut);
                }
            }
        }

        collected.into_iter().map(|(_, item)| item).collect()
    }

    /// Fetch every live channel behind a bounded pool, then apply the
    /// outcomes one channel at a time. A channel's failure never
    /// touches another channel.
    pub async fn refresh(
        &mut self,
        client: &reqwest::Client,
        fetch_config: &FetchConfig,
        concurrency: usize,
        offline: bool,
    ) {
        if offline {
            tracing::info!("offline run, cache left as-is");
            return;
        }

        let requests: Vec<(usize, String, Option<String>, Option<String>)> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_gone())
            .map(|(i, c)| {
                (
                    i,
                    c.url().to_string(),
                    c.etag().map(str::to_string),
                    c.last_modified().map(str::to_string),
                )
            })
            .collect();

        let skipped = self.channels.len() - requests.len();
        if skipped > 0 {
            tracing::info!(skipped, "gone feeds not fetched");
        }

        let outcomes: Vec<(usize, FetchOutcome)> = stream::iter(requests)
            .map(|(index, url, etag, last_modified)| {
                let client = client.clone();
                let config = fetch_config.clone();
                async move {
                    let outcome = fetcher::fetch_feed(
                        &client,
                        &url,
                        etag.as_deref(),
                        last_modified.as_deref(),
                        &config,
                    )
                    .await;
                    (index, outcome)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (index, outcome) in outcomes {
            let new_feed_items = self.new_feed_items;
            let channel = &mut self.channels[index];
            let status = outcome.status.clone();
            if let Err(e) = channel
                .apply(outcome, Timestamp::now(), new_feed_items)
                .await
            {
                tracing::error!(feed = %channel.feed_information(), error = %e, "update failed");
            } else {
                tracing::debug!(feed = %channel.feed_information(), %status, "update applied");
            }
        }
    }
}
