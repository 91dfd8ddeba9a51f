//! Typed fields over the untyped durable string map.
//!
//! A [`Record`] is one logical cache object — the channel itself or a
//! single entry — identified by its namespace. Values live in an
//! in-memory overlay; [`Record::flush`] stages the dirty subset onto
//! the owning [`DiskStore`], and the store's commit makes them
//! durable. Reading a key that was never written yields
//! [`FieldValue::Absent`], never an error.

use std::collections::{HashMap, HashSet};

use super::disk::{DiskStore, StoreOp};
use super::{StoreError, Timestamp};

/// Namespace of the channel-level record.
pub const ROOT_NS: &str = "";

const KIND_STRING: &str = "string";
const KIND_DATE: &str = "date";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Null,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => KIND_STRING,
            FieldKind::Date => KIND_DATE,
            FieldKind::Null => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Date(Timestamp),
    Absent,
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::Absent => FieldKind::Null,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Timestamp> {
        match self {
            FieldValue::Date(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// Display form: the text itself, or the ISO rendering of a date.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Date(ts) => ts.to_string(),
            FieldValue::Absent => String::new(),
        }
    }
}

static ABSENT: FieldValue = FieldValue::Absent;

pub struct Record {
    store: DiskStore,
    ns: String,
    fields: HashMap<String, FieldValue>,
    dirty: HashSet<String>,
    doomed: HashSet<String>,
}

impl Record {
    /// Fresh record with nothing loaded, for first-seen entries.
    pub fn new(store: DiskStore, ns: impl Into<String>) -> Self {
        Self {
            store,
            ns: ns.into(),
            fields: HashMap::new(),
            dirty: HashSet::new(),
            doomed: HashSet::new(),
        }
    }

    /// Populate the overlay from every key under this record's
    /// namespace.
    pub async fn load(store: DiskStore, ns: impl Into<String>) -> Result<Self, StoreError> {
        let ns = ns.into();
        let rows = store.read_namespace(&ns).await?;
        let mut fields = HashMap::with_capacity(rows.len());
        for (key, value, kind) in rows {
            let value = match kind.as_str() {
                KIND_DATE => FieldValue::Date(
                    Timestamp::decode(&value)
                        .map_err(|source| StoreError::Date { key: key.clone(), source })?,
                ),
                KIND_STRING => FieldValue::Text(value),
                other => {
                    tracing::warn!(ns = %ns, key = %key, kind = %other, "unknown field kind, treating as string");
                    FieldValue::Text(value)
                }
            };
            fields.insert(key, value);
        }
        Ok(Self {
            store,
            ns,
            fields,
            dirty: HashSet::new(),
            doomed: HashSet::new(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    pub fn get(&self, key: &str) -> &FieldValue {
        self.fields.get(key).unwrap_or(&ABSENT)
    }

    pub fn key_type(&self, key: &str) -> FieldKind {
        self.get(key).kind()
    }

    pub fn has(&self, key: &str) -> bool {
        !self.get(key).is_absent()
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).as_text()
    }

    pub fn date(&self, key: &str) -> Option<Timestamp> {
        self.get(key).as_date()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.insert(key, FieldValue::Text(value.into()));
    }

    pub fn set_date(&mut self, key: &str, value: Timestamp) {
        self.insert(key, FieldValue::Date(value));
    }

    fn insert(&mut self, key: &str, value: FieldValue) {
        self.doomed.remove(key);
        self.dirty.insert(key.to_string());
        self.fields.insert(key.to_string(), value);
    }

    /// Remove the field from the overlay and queue its durable removal.
    pub fn delete_key(&mut self, key: &str) {
        self.fields.remove(key);
        self.dirty.remove(key);
        self.doomed.insert(key.to_string());
    }

    /// Stage all dirty fields and queued deletions. With `sync` the
    /// store commits immediately; without it the writes wait for a
    /// caller-controlled [`DiskStore::commit`].
    pub async fn flush(&mut self, sync: bool) -> Result<(), StoreError> {
        for key in self.dirty.drain() {
            let value = self
                .fields
                .get(&key)
                .expect("dirty key always has a value");
            let (text, kind) = match value {
                FieldValue::Text(s) => (s.clone(), KIND_STRING),
                FieldValue::Date(ts) => (ts.encode(), KIND_DATE),
                FieldValue::Absent => unreachable!("absent values are never inserted"),
            };
            self.store.stage(StoreOp::Put {
                ns: self.ns.clone(),
                key,
                value: text,
                kind: kind.to_string(),
            });
        }
        for key in self.doomed.drain() {
            self.store.stage(StoreOp::Delete {
                ns: self.ns.clone(),
                key,
            });
        }
        if sync {
            self.store.commit().await?;
        }
        Ok(())
    }

    /// Drop every field of this record from durable storage.
    pub async fn clear(&mut self, sync: bool) -> Result<(), StoreError> {
        self.fields.clear();
        self.dirty.clear();
        self.doomed.clear();
        self.store.stage(StoreOp::ClearNamespace {
            ns: self.ns.clone(),
        });
        if sync {
            self.store.commit().await?;
        }
        Ok(())
    }
}
