//! feed-rs document mapping and stable entry identity.

use anyhow::Result;
use feed_rs::model;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use super::{Detail, EntryField, ParsedEntry, ParsedFeed, TextKind};
use crate::store::Timestamp;

/// Parse an RSS/Atom document into the engine's feed shape.
pub fn parse_document(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;
    Ok(map_feed(feed))
}

/// Channel-unique identity for an entry, with fallbacks for feeds that
/// omit ids: explicit id, then link, then a digest of the title, then a
/// digest of the summary. Returns `None` when nothing usable exists.
pub fn stable_id(channel_url: &str, entry: &ParsedEntry) -> Option<String> {
    if let Some(id) = non_empty(entry.text("id")) {
        return Some(id.to_string());
    }
    if let Some(link) = non_empty(entry.text("link")) {
        return Some(link.to_string());
    }
    for key in ["title", "summary"] {
        if let Some(value) = non_empty(entry.text(key)) {
            let hash = Sha256::digest(value.as_bytes());
            return Some(format!("{channel_url}/{hash:x}"));
        }
    }
    None
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn map_feed(feed: model::Feed) -> ParsedFeed {
    let mut out = ParsedFeed::default();
    let fields = &mut out.fields;

    if !feed.id.is_empty() {
        push_text(fields, "id", feed.id);
    }
    if let Some(title) = feed.title {
        fields.push(("title".into(), typed_text(title)));
    }
    if let Some(link) = feed.links.first() {
        push_text(fields, "link", link.href.clone());
    }
    if let Some(description) = feed.description {
        fields.push(("tagline".into(), typed_text(description)));
    }
    if let Some(language) = feed.language {
        push_text(fields, "language", language);
    }
    if let Some(rights) = feed.rights {
        fields.push(("copyright".into(), typed_text(rights)));
    }
    if let Some(generator) = feed.generator {
        push_text(fields, "generator", generator.content);
    }
    push_person(fields, "author", feed.authors.into_iter().next());
    // The document's own modification date is a claim; `updated` is
    // reserved for the reconciliation clock.
    if let Some(updated) = feed.updated {
        fields.push((
            "modified".into(),
            EntryField::Date(Timestamp::from_datetime(updated)),
        ));
    }
    if let Some(published) = feed.published {
        fields.push((
            "published".into(),
            EntryField::Date(Timestamp::from_datetime(published)),
        ));
    }
    if let Some(image) = feed.logo.or(feed.icon) {
        fields.push((
            "image".into(),
            EntryField::Image {
                url: Some(image.uri),
                link: image.link.map(|l| l.href),
                title: image.title,
                width: image.width,
                height: image.height,
            },
        ));
    }

    out.entries = feed.entries.into_iter().map(map_entry).collect();
    out
}

fn map_entry(entry: model::Entry) -> ParsedEntry {
    let mut out = ParsedEntry::new();
    let fields = &mut out.fields;

    if !entry.id.is_empty() {
        push_text(fields, "id", entry.id);
    }
    if let Some(title) = entry.title {
        fields.push(("title".into(), typed_text(title)));
    }
    if let Some(link) = entry.links.first() {
        push_text(fields, "link", link.href.clone());
    }
    if let Some(summary) = entry.summary {
        fields.push(("summary".into(), typed_text(summary)));
    }
    if let Some(content) = entry.content {
        if let Some(body) = content.body {
            fields.push((
                "content".into(),
                EntryField::Content(vec![super::ContentPart {
                    value: body,
                    kind: TextKind::from_mime(&content.content_type.to_string()),
                    language: None,
                }]),
            ));
        }
    }
    push_person(fields, "author", entry.authors.into_iter().next());
    if let Some(updated) = entry.updated {
        fields.push((
            "updated".into(),
            EntryField::Date(Timestamp::from_datetime(updated)),
        ));
    }
    if let Some(published) = entry.published {
        fields.push((
            "published".into(),
            EntryField::Date(Timestamp::from_datetime(published)),
        ));
    }
    if let Some(source) = entry.source {
        fields.push((
            "source".into(),
            EntryField::Source {
                name: None,
                link: Some(source),
            },
        ));
    }

    out
}

fn typed_text(text: model::Text) -> EntryField {
    EntryField::Text {
        kind: Some(TextKind::from_mime(&text.content_type.to_string())),
        value: text.content,
    }
}

fn push_text(fields: &mut Vec<(String, EntryField)>, key: &str, value: String) {
    fields.push((
        key.to_string(),
        EntryField::Text { value, kind: None },
    ));
}

fn push_person(fields: &mut Vec<(String, EntryField)>, base: &str, person: Option<model::Person>) {
    let Some(person) = person else {
        return;
    };
    let display = if person.name.is_empty() {
        person.email.clone()
    } else {
        Some(person.name.clone())
    };
    if let Some(display) = display {
        push_text(fields, base, display);
    }
    fields.push((
        format!("{base}_detail"),
        EntryField::Detail(Detail {
            name: (!person.name.is_empty()).then_some(person.name),
            email: person.email,
            language: None,
        }),
    ));
}
