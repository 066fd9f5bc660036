use feed_rs::model::{Entry as RawEntry, Person, Text};
use feed_rs::parser;
use std::collections::BTreeMap;

use super::entry::{Entry, EntryField, FieldValue};

/// Parsed feed body.
///
/// `bozo` marks a body the parser could not make sense of; such documents carry
/// no entries and are never used for delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub entries: Vec<Entry>,
    pub bozo: bool,
}

impl FeedDocument {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            bozo: false,
        }
    }

    pub fn bozo() -> Self {
        Self {
            entries: Vec::new(),
            bozo: true,
        }
    }
}

/// Parses RSS/Atom/JSON Feed bytes. Never fails; unparseable input yields a bozo document.
pub fn parse_document(bytes: &[u8]) -> FeedDocument {
    match parser::parse(bytes) {
        Ok(feed) => FeedDocument::new(feed.entries.into_iter().map(convert_entry).collect()),
        Err(e) => {
            tracing::trace!(error = %e, "Feed body did not parse");
            FeedDocument::bozo()
        }
    }
}

fn convert_entry(raw: RawEntry) -> Entry {
    let mut entry = Entry::new();

    if let Some(title) = raw.title {
        entry.insert(EntryField::TitleDetail, text_detail(&title));
        entry.insert(EntryField::Title, FieldValue::Text(title.content));
    }

    if let Some(summary) = raw.summary {
        entry.insert(EntryField::SummaryDetail, text_detail(&summary));
        // RSS <description> and Atom <summary> land in the same place
        entry.insert(
            EntryField::Description,
            FieldValue::Text(summary.content.clone()),
        );
        entry.insert(EntryField::Summary, FieldValue::Text(summary.content));
    }

    if let Some(body) = raw.content.and_then(|c| c.body) {
        entry.insert(EntryField::Content, FieldValue::List(vec![body]));
    }

    if let Some(author) = raw.authors.first() {
        entry.insert(EntryField::Author, FieldValue::Text(author.name.clone()));
        entry.insert(EntryField::AuthorDetail, person_detail(author));
    }

    entry.insert(
        EntryField::Contributors,
        FieldValue::List(raw.contributors.iter().map(|p| p.name.clone()).collect()),
    );

    let link = raw
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| raw.links.first());
    if let Some(link) = link {
        entry.insert(EntryField::Link, FieldValue::Text(link.href.clone()));
    }

    entry.insert(
        EntryField::Tags,
        FieldValue::List(raw.categories.into_iter().map(|c| c.term).collect()),
    );

    if let Some(source) = raw.source {
        entry.insert(EntryField::Source, FieldValue::Text(source));
    }

    entry.set_published(raw.published);
    entry.set_updated(raw.updated);
    entry
}

fn text_detail(text: &Text) -> FieldValue {
    let mut record = BTreeMap::new();
    record.insert("type".to_owned(), text.content_type.to_string());
    record.insert("value".to_owned(), text.content.clone());
    FieldValue::Record(record)
}

fn person_detail(person: &Person) -> FieldValue {
    let mut record = BTreeMap::new();
    record.insert("name".to_owned(), person.name.clone());
    if let Some(email) = &person.email {
        record.insert("email".to_owned(), email.clone());
    }
    if let Some(uri) = &person.uri {
        record.insert("href".to_owned(), uri.clone());
    }
    FieldValue::Record(record)
}
