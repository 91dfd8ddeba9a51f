use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use orrery::channel::ChannelConfig;
use orrery::config::Config;
use orrery::feed::fetcher;
use orrery::item::NewsItem;
use orrery::planet::{ItemQuery, Planet};
use orrery::store::FieldValue;
use orrery::Channel;

#[derive(Parser)]
#[command(name = "orrery", version, about = "Aggregate syndicated feeds into one combined view")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "orrery.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every subscribed feed and reconcile the cache
    Refresh {
        /// Skip all network fetches and only report the cached state
        #[arg(long)]
        offline: bool,
    },
    /// Print the aggregated item view
    List {
        /// Restrict to one feed URL
        #[arg(long)]
        feed: Option<String>,
        /// Include hidden channels and items
        #[arg(long)]
        hidden: bool,
        /// Cap the number of items (defaults to items_per_page)
        #[arg(long)]
        max_items: Option<usize>,
        /// Drop items older than this many days (defaults to days_per_page)
        #[arg(long)]
        max_days: Option<i64>,
    },
    /// Print a channel's cached fields
    Inspect { feed: String },
    /// Print one cached item's fields
    Item { feed: String, id: String },
    /// Mark an item hidden
    Hide { feed: String, id: String },
    /// Make a hidden item visible again
    Unhide { feed: String, id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Refresh { offline } => refresh(&config, offline).await,
        Command::List {
            feed,
            hidden,
            max_items,
            max_days,
        } => {
            let planet = build_planet(&config).await?;
            let query = ItemQuery {
                include_hidden: hidden,
                sorted: true,
                max_items: max_items.unwrap_or(config.planet.items_per_page),
                max_days: max_days.unwrap_or(config.planet.days_per_page),
                channels: feed.map(|url| vec![url]),
            };
            for entry in planet.items(&query) {
                let date = entry
                    .item
                    .date()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".repeat(25));
                println!(
                    "{}  {:<24}  {}",
                    date,
                    fit_str(entry.channel.display_name(), 24),
                    entry.item.text("title").unwrap_or("(untitled)")
                );
            }
            Ok(())
        }
        Command::Inspect { feed } => {
            let planet = build_planet(&config).await?;
            let channel = planet
                .find_channel(&feed)
                .with_context(|| format!("<{feed}> is not a configured feed"))?;
            let keys: Vec<&str> = channel.keys().collect();
            print_fields(&feed, keys, |key| channel.get(key));
            println!();
            for item in channel.sorted_entries(true) {
                println!(
                    "{}  {}",
                    item.id_hash(),
                    item.text("title").unwrap_or("(untitled)")
                );
            }
            Ok(())
        }
        Command::Item { feed, id } => {
            let planet = build_planet(&config).await?;
            let item = find_item(&planet, &feed, &id)?;
            let keys: Vec<&str> = item.keys().collect();
            print_fields(item.id(), keys, |key| item.get(key));
            Ok(())
        }
        Command::Hide { feed, id } => set_hidden(&config, &feed, &id, true).await,
        Command::Unhide { feed, id } => set_hidden(&config, &feed, &id, false).await,
    }
}

async fn refresh(config: &Config, offline: bool) -> Result<()> {
    let mut planet = build_planet(config).await?;
    if config.feeds.is_empty() {
        anyhow::bail!("no feeds configured, nothing to refresh");
    }

    let client = fetcher::client();
    planet
        .refresh(
            &client,
            &config.fetch_config(),
            config.planet.concurrency,
            offline,
        )
        .await;

    for channel in planet.channels(true, true) {
        let name = if channel.display_name().is_empty() {
            channel.url()
        } else {
            channel.display_name()
        };
        println!("{:>5}  {}", channel.len(), name);
    }
    Ok(())
}

async fn build_planet(config: &Config) -> Result<Planet> {
    let mut planet = Planet::new(config.planet.new_feed_items).with_filters(
        config.planet.filter.as_deref(),
        config.planet.exclude.as_deref(),
    );

    for feed in &config.feeds {
        if let Err(e) = url::Url::parse(&feed.url) {
            tracing::warn!(feed = %feed.url, error = %e, "skipping invalid feed url");
            continue;
        }
        match Channel::open(&config.planet.cache_dir, ChannelConfig::from(feed)).await {
            Ok(channel) => planet.subscribe(channel),
            // One bad cache must not take the rest of the run down
            Err(e) => {
                tracing::error!(feed = %feed.url, error = %e, "could not open channel cache")
            }
        }
    }
    Ok(planet)
}

fn find_item<'a>(planet: &'a Planet, feed: &str, id: &str) -> Result<&'a NewsItem> {
    let channel = planet
        .find_channel(feed)
        .with_context(|| format!("<{feed}> is not a configured feed"))?;
    channel
        .get_item(id)
        .with_context(|| format!("no cached item {id:?} in <{feed}>"))
}

async fn set_hidden(config: &Config, feed: &str, id: &str, hidden: bool) -> Result<()> {
    let mut planet = build_planet(config).await?;
    let channel = planet
        .find_channel_mut(feed)
        .with_context(|| format!("<{feed}> is not a configured feed"))?;
    {
        let item = channel
            .get_item_mut(id)
            .with_context(|| format!("no cached item {id:?} in <{feed}>"))?;
        if hidden {
            item.hide();
        } else {
            item.unhide();
        }
    }
    channel.persist().await?;
    println!("{} {}", if hidden { "hid" } else { "unhid" }, id);
    Ok(())
}

fn print_fields<'a>(title: &str, mut keys: Vec<&'a str>, get: impl Fn(&str) -> &'a FieldValue) {
    keys.sort_unstable();
    let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);
    println!("{title}:");
    for key in keys {
        let value = get(key).render();
        println!(
            "    {:<width$}  {}",
            key,
            fit_str(&value, 74usize.saturating_sub(width)),
        );
    }
}

fn fit_str(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        text.to_string()
    } else {
        let cut: String = text.chars().take(length.saturating_sub(4)).collect();
        format!("{cut} ...")
    }
}
