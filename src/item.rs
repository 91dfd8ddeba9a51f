//! One cached feed entry.
//!
//! A [`NewsItem`] owns the typed record for a single entry: the field
//! merge that folds a parsed entry into the cache, and the date
//! resolution that turns the feed's assorted claims into the one
//! canonical `date` everything sorts by.

use sha2::{Digest, Sha256};

use crate::feed::{Detail, EntryField, ParsedEntry, TextKind};
use crate::store::{DiskStore, FieldValue, Record, StoreError, Timestamp};

/// Read-only channel state an item consults while merging: the
/// channel's reconciliation clock and its declared language.
#[derive(Debug, Clone, Default)]
pub struct ChannelContext {
    pub updated: Option<Timestamp>,
    pub language: Option<String>,
}

/// Pure ordering snapshot: seconds since epoch, then creation order.
/// Items whose date cannot be represented sort as oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub epoch: i64,
    pub order: u64,
}

// Structural fields that never merge into the cache.
const IGNORE_KEYS: &[&str] = &[
    "categories",
    "contributors",
    "enclosures",
    "links",
    "guidislink",
    "date",
    "tags",
];

// Claimed dates, in resolution priority order.
const DATE_CLAIMS: &[&str] = &["updated", "modified", "published", "issued", "created"];

pub struct NewsItem {
    record: Record,
    id: String,
    id_hash: String,
    order: u64,
}

impl NewsItem {
    /// Fresh item for a first-seen entry id.
    pub fn create(store: DiskStore, id: impl Into<String>) -> Self {
        let id = id.into();
        Self::with_record(Record::new(store, id.clone()), id)
    }

    /// Item backed by previously cached fields.
    pub async fn load(store: DiskStore, id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        let record = Record::load(store, id.clone()).await?;
        Ok(Self::with_record(record, id))
    }

    fn with_record(record: Record, id: String) -> Self {
        let id_hash = short_hash(&id);
        let order = record
            .text("order")
            .and_then(|o| o.parse().ok())
            .unwrap_or(0);
        Self {
            record,
            id,
            id_hash,
            order,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Short printable digest of the id, for display only.
    pub fn id_hash(&self) -> &str {
        &self.id_hash
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    /// Held and compared numerically; persisted as text because the
    /// store is string-oriented.
    pub fn set_order(&mut self, order: u64) {
        self.order = order;
        self.record.set_string("order", order.to_string());
    }

    pub fn hidden(&self) -> bool {
        self.record.has("hidden")
    }

    pub fn hide(&mut self) {
        self.record.set_string("hidden", "yes");
    }

    pub fn unhide(&mut self) {
        self.record.delete_key("hidden");
    }

    pub fn date(&self) -> Option<Timestamp> {
        self.record.date("date")
    }

    pub fn time_since_epoch(&self) -> i64 {
        self.date().map(|d| d.unix()).unwrap_or(i64::MIN)
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            epoch: self.time_since_epoch(),
            order: self.order,
        }
    }

    pub fn get(&self, key: &str) -> &FieldValue {
        self.record.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.record.text(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.record.keys()
    }

    /// The displayable body: first of `content`, `tagline`, `summary`.
    pub fn content(&self) -> &str {
        for key in ["content", "tagline", "summary"] {
            if let Some(value) = self.record.text(key) {
                return value;
            }
        }
        ""
    }

    /// Fold one parsed entry into the cached fields, then recompute the
    /// canonical sort date.
    pub fn update(&mut self, entry: &ParsedEntry, ctx: &ChannelContext) {
        for (key, field) in &entry.fields {
            if IGNORE_KEYS.contains(&key.as_str()) {
                continue;
            }
            match field {
                EntryField::Date(when) => self.record.set_date(key, *when),
                EntryField::Detail(detail) => {
                    let base = key.strip_suffix("_detail").unwrap_or(key);
                    merge_detail(&mut self.record, base, detail, ctx);
                }
                EntryField::Source { name, link } => {
                    if let Some(name) = name {
                        self.record.set_string("source_name", name);
                    }
                    if let Some(link) = link {
                        self.record.set_string("source_link", link);
                    }
                }
                EntryField::Content(parts) => {
                    let mut value = String::new();
                    for part in parts {
                        match &part.kind {
                            TextKind::Html => value.push_str(&part.value),
                            TextKind::Plain => {
                                value.push_str(&html_escape::encode_text(&part.value))
                            }
                            TextKind::Other(declared) => {
                                tracing::debug!(
                                    entry = %self.id,
                                    declared = %declared,
                                    "content block of undeclared format kept verbatim"
                                );
                                value.push_str(&part.value);
                            }
                        }
                        if let Some(language) = &part.language {
                            if ctx.language.as_deref() != Some(language.as_str()) {
                                self.record.set_string(&format!("{key}_language"), language);
                            }
                        }
                    }
                    self.record.set_string(key, value);
                }
                EntryField::Image { .. } => {
                    // feed-level composite; entries never carry one
                }
                EntryField::Text { value, kind } => {
                    merge_scalar(&mut self.record, &self.id, key, value, kind.as_ref());
                }
            }
        }

        self.resolve_date("date", ctx);
    }

    /// Resolve (and cache) the canonical date for `key`.
    ///
    /// The first claimed date wins, but a claim newer than the
    /// channel's own update time is clamped down to it — entries sort
    /// in posting sequence without creeping past the fetch that
    /// produced them. With no claim, a previously cached value is kept;
    /// failing that, the channel update time is used.
    pub fn resolve_date(&mut self, key: &str, ctx: &ChannelContext) -> Option<Timestamp> {
        let claimed = DATE_CLAIMS.iter().find_map(|claim| self.record.date(claim));

        let resolved = match claimed {
            Some(mut when) => {
                if let Some(channel_updated) = ctx.updated {
                    if when > channel_updated {
                        when = channel_updated;
                    }
                }
                Some(when)
            }
            None => {
                if let Some(cached) = self.record.date(key) {
                    return Some(cached);
                }
                ctx.updated
            }
        };

        if let Some(when) = resolved {
            self.record.set_date(key, when);
        }
        resolved
    }

    pub(crate) async fn flush(&mut self, sync: bool) -> Result<(), StoreError> {
        self.record.flush(sync).await
    }

    pub(crate) async fn clear(&mut self, sync: bool) -> Result<(), StoreError> {
        self.record.clear(sync).await
    }
}

/// Two items are the same item iff their ids match.
impl PartialEq for NewsItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NewsItem {}

fn short_hash(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Scalar text merge shared by items and channel metadata: declared
/// HTML is trusted as markup, declared plain text is escaped, and an
/// undeclared type is stored verbatim. An unrecognised declared type
/// skips the write.
pub(crate) fn merge_scalar(
    record: &mut Record,
    owner: &str,
    key: &str,
    value: &str,
    kind: Option<&TextKind>,
) {
    match kind {
        None | Some(TextKind::Html) => record.set_string(key, value),
        Some(TextKind::Plain) => record.set_string(key, html_escape::encode_text(value).as_ref()),
        Some(TextKind::Other(declared)) => {
            tracing::warn!(
                owner = %owner,
                key = %key,
                declared = %declared,
                "ignored field of unknown format"
            );
        }
    }
}

/// Detail merge shared by items and channel metadata: only name, email,
/// and a diverging language survive, as derived field names.
pub(crate) fn merge_detail(record: &mut Record, base: &str, detail: &Detail, ctx: &ChannelContext) {
    if let Some(name) = &detail.name {
        record.set_string(&format!("{base}_name"), name);
    }
    if let Some(email) = &detail.email {
        record.set_string(&format!("{base}_email"), email);
    }
    if let Some(language) = &detail.language {
        if ctx.language.as_deref() != Some(language.as_str()) {
            record.set_string(&format!("{base}_language"), language);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ContentPart;
    use pretty_assertions::assert_eq;

    async fn fresh_item() -> NewsItem {
        let store = DiskStore::open_memory().await.unwrap();
        NewsItem::create(store, "urn:test:1")
    }

    fn ctx_at(secs: i64) -> ChannelContext {
        ChannelContext {
            updated: Timestamp::from_unix(secs),
            language: None,
        }
    }

    #[tokio::test]
    async fn scalar_merge_trusts_html_and_escapes_plain() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new()
            .with_typed_text("title", "a <b> & c", TextKind::Plain)
            .with_typed_text("summary", "<p>kept</p>", TextKind::Html)
            .with_text("link", "https://example.com/1");
        item.update(&entry, &ctx_at(1_000_000));

        assert_eq!(item.text("title"), Some("a &lt;b&gt; &amp; c"));
        assert_eq!(item.text("summary"), Some("<p>kept</p>"));
        assert_eq!(item.text("link"), Some("https://example.com/1"));
    }

    #[tokio::test]
    async fn unknown_declared_type_skips_the_write() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new().with_typed_text(
            "title",
            "whatever",
            TextKind::Other("application/x-mystery".into()),
        );
        item.update(&entry, &ctx_at(1_000_000));
        assert!(item.get("title").is_absent());
    }

    #[tokio::test]
    async fn structural_fields_are_dropped() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new()
            .with_text("tags", "a,b")
            .with_text("enclosures", "x")
            .with_text("title", "kept");
        item.update(&entry, &ctx_at(1_000_000));
        assert!(item.get("tags").is_absent());
        assert!(item.get("enclosures").is_absent());
        assert_eq!(item.text("title"), Some("kept"));
    }

    #[tokio::test]
    async fn detail_contributes_derived_names() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new().with_field(
            "author_detail",
            EntryField::Detail(Detail {
                name: Some("John Doe".into()),
                email: Some("john@example.com".into()),
                language: Some("fr".into()),
            }),
        );
        let ctx = ChannelContext {
            updated: Timestamp::from_unix(1_000_000),
            language: Some("en".into()),
        };
        item.update(&entry, &ctx);

        assert_eq!(item.text("author_name"), Some("John Doe"));
        assert_eq!(item.text("author_email"), Some("john@example.com"));
        // diverges from the channel's "en"
        assert_eq!(item.text("author_language"), Some("fr"));
    }

    #[tokio::test]
    async fn matching_language_is_not_recorded() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new().with_field(
            "author_detail",
            EntryField::Detail(Detail {
                name: Some("John".into()),
                email: None,
                language: Some("en".into()),
            }),
        );
        let ctx = ChannelContext {
            updated: Timestamp::from_unix(1_000_000),
            language: Some("en".into()),
        };
        item.update(&entry, &ctx);
        assert!(item.get("author_language").is_absent());
    }

    #[tokio::test]
    async fn content_parts_concatenate_with_escaping() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new().with_field(
            "content",
            EntryField::Content(vec![
                ContentPart {
                    value: "<p>html part</p>".into(),
                    kind: TextKind::Html,
                    language: None,
                },
                ContentPart {
                    value: "a < b".into(),
                    kind: TextKind::Plain,
                    language: Some("de".into()),
                },
            ]),
        );
        item.update(&entry, &ctx_at(1_000_000));

        assert_eq!(item.text("content"), Some("<p>html part</p>a &lt; b"));
        assert_eq!(item.text("content_language"), Some("de"));
        assert_eq!(item.content(), "<p>html part</p>a &lt; b");
    }

    #[tokio::test]
    async fn source_composite_splits_into_name_and_link() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new().with_field(
            "source",
            EntryField::Source {
                name: Some("Upstream".into()),
                link: Some("https://upstream.example.com/feed".into()),
            },
        );
        item.update(&entry, &ctx_at(1_000_000));
        assert_eq!(item.text("source_name"), Some("Upstream"));
        assert_eq!(
            item.text("source_link"),
            Some("https://upstream.example.com/feed")
        );
    }

    #[tokio::test]
    async fn claimed_date_in_the_past_is_kept() {
        let mut item = fresh_item().await;
        let claim = Timestamp::from_unix(500_000).unwrap();
        let entry = ParsedEntry::new().with_date("published", claim);
        item.update(&entry, &ctx_at(1_000_000));
        assert_eq!(item.date(), Some(claim));
    }

    #[tokio::test]
    async fn future_claim_is_clamped_to_channel_update_time() {
        let mut item = fresh_item().await;
        let entry =
            ParsedEntry::new().with_date("updated", Timestamp::from_unix(2_000_000).unwrap());
        item.update(&entry, &ctx_at(1_000_000));
        assert_eq!(item.date(), Timestamp::from_unix(1_000_000));
    }

    #[tokio::test]
    async fn no_claim_falls_back_to_channel_update_time() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new().with_text("title", "undated");
        item.update(&entry, &ctx_at(1_000_000));
        assert_eq!(item.date(), Timestamp::from_unix(1_000_000));
    }

    #[tokio::test]
    async fn cached_date_survives_a_claimless_update() {
        let mut item = fresh_item().await;
        let first = ParsedEntry::new().with_date("published", Timestamp::from_unix(500_000).unwrap());
        item.update(&first, &ctx_at(1_000_000));

        // The claim key itself is still cached, so resolution finds it
        // again; the canonical date must not drift to the new clock.
        let second = ParsedEntry::new().with_text("title", "edited");
        item.update(&second, &ctx_at(3_000_000));
        assert_eq!(item.date(), Timestamp::from_unix(500_000));
    }

    #[tokio::test]
    async fn claim_priority_follows_the_documented_order() {
        let mut item = fresh_item().await;
        let entry = ParsedEntry::new()
            .with_date("created", Timestamp::from_unix(111_111).unwrap())
            .with_date("modified", Timestamp::from_unix(222_222).unwrap());
        item.update(&entry, &ctx_at(1_000_000));
        // "modified" outranks "created"
        assert_eq!(item.date(), Timestamp::from_unix(222_222));
    }

    #[tokio::test]
    async fn sort_keys_order_by_date_then_creation_order() {
        let store = DiskStore::open_memory().await.unwrap();
        let mut a = NewsItem::create(store.clone(), "a");
        let mut b = NewsItem::create(store.clone(), "b");
        let when = Timestamp::from_unix(1_000_000).unwrap();
        let entry = ParsedEntry::new().with_date("published", when);
        let ctx = ctx_at(2_000_000);
        a.update(&entry, &ctx);
        b.update(&entry, &ctx);
        a.set_order(3);
        b.set_order(10);

        assert!(b.sort_key() > a.sort_key());
    }

    #[tokio::test]
    async fn hidden_is_a_presence_flag() {
        let mut item = fresh_item().await;
        assert!(!item.hidden());
        item.hide();
        assert!(item.hidden());
        item.unhide();
        assert!(!item.hidden());
    }

    #[tokio::test]
    async fn id_hash_is_short_and_deterministic() {
        let store = DiskStore::open_memory().await.unwrap();
        let a = NewsItem::create(store.clone(), "urn:test:1");
        let b = NewsItem::create(store.clone(), "urn:test:1");
        assert_eq!(a.id_hash(), b.id_hash());
        assert_eq!(a.id_hash().len(), 16);
    }
}
