//! Fetch-side collaborator boundary.
//!
//! The reconciliation engine consumes exactly one shape from the
//! network: a [`FetchOutcome`] — a closed status classification plus
//! feed-level metadata and an ordered list of entries whose dates are
//! already parsed. [`parser`] maps feed-rs documents into that shape
//! and [`fetcher`] produces it over HTTP; everything downstream is
//! oblivious to both.

pub mod fetcher;
pub mod parser;

use crate::store::Timestamp;

/// Declared MIME class of a text value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextKind {
    Html,
    Plain,
    Other(String),
}

impl TextKind {
    /// Classify a MIME string, ignoring parameters.
    pub fn from_mime(mime: &str) -> TextKind {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            "text/html" | "application/xhtml+xml" => TextKind::Html,
            "text/plain" => TextKind::Plain,
            other => TextKind::Other(other.to_string()),
        }
    }
}

/// Name/email/language sub-fields of a person- or content-detail
/// object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detail {
    pub name: Option<String>,
    pub email: Option<String>,
    pub language: Option<String>,
}

/// One block of a multi-part content field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    pub value: String,
    pub kind: TextKind,
    pub language: Option<String>,
}

/// A single field as supplied by the feed, classified for the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryField {
    /// Scalar text, with the MIME class its companion detail declared.
    Text {
        value: String,
        kind: Option<TextKind>,
    },
    /// Pre-parsed date.
    Date(Timestamp),
    /// Detail sub-object; only name/email/language survive the merge.
    Detail(Detail),
    /// Source composite.
    Source {
        name: Option<String>,
        link: Option<String>,
    },
    /// Multi-part content.
    Content(Vec<ContentPart>),
    /// Feed-level image composite.
    Image {
        url: Option<String>,
        link: Option<String>,
        title: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    },
}

/// An ordered bag of named fields — one feed entry, or the feed-level
/// metadata itself.
#[derive(Debug, Clone, Default)]
pub struct ParsedEntry {
    pub fields: Vec<(String, EntryField)>,
}

impl ParsedEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, field: EntryField) {
        self.fields.push((key.into(), field));
    }

    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(
            key,
            EntryField::Text {
                value: value.into(),
                kind: None,
            },
        );
        self
    }

    pub fn with_typed_text(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        kind: TextKind,
    ) -> Self {
        self.push(
            key,
            EntryField::Text {
                value: value.into(),
                kind: Some(kind),
            },
        );
        self
    }

    pub fn with_date(mut self, key: impl Into<String>, when: Timestamp) -> Self {
        self.push(key, EntryField::Date(when));
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, field: EntryField) -> Self {
        self.push(key, field);
        self
    }

    /// First text value stored under `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.iter().find_map(|(k, f)| match f {
            EntryField::Text { value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }
}

/// Feed-level metadata plus the ordered entry list.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub fields: Vec<(String, EntryField)>,
    pub entries: Vec<ParsedEntry>,
}

/// Closed set of per-update outcomes the channel reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Entries present, run the full reconciliation.
    Fresh,
    /// Conditional fetch hit; nothing to do.
    Unchanged,
    /// Permanent redirect with entries; re-point the channel.
    Moved { url: String },
    /// Feed is gone for good; persist and stop refreshing.
    Gone,
    /// Transport or HTTP timeout; retry next cycle.
    Timeout,
    /// Reconcile, but never expire entries absent from the feed.
    RetainAll,
    /// Any other failure. `status` 0 means no HTTP status was obtained.
    Error { status: u16 },
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStatus::Fresh => write!(f, "fresh"),
            FetchStatus::Unchanged => write!(f, "unchanged"),
            FetchStatus::Moved { url } => write!(f, "moved to <{url}>"),
            FetchStatus::Gone => write!(f, "gone"),
            FetchStatus::Timeout => write!(f, "timeout"),
            FetchStatus::RetainAll => write!(f, "retain-all"),
            FetchStatus::Error { status } => write!(f, "error (http {status})"),
        }
    }
}

/// Everything one fetch produced.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub feed: ParsedFeed,
}

impl FetchOutcome {
    /// Outcome carrying no document — unchanged, gone, timeout, error.
    pub fn bare(status: FetchStatus, http_status: Option<u16>) -> Self {
        Self {
            status,
            http_status,
            etag: None,
            last_modified: None,
            feed: ParsedFeed::default(),
        }
    }
}
