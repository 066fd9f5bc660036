use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named fields an entry may carry.
///
/// Names follow the conventional feed-entry vocabulary (`title`, `summary_detail`,
/// `tags`, ...). Time fields are part of the vocabulary so templates can use them,
/// but they are not eligible for match rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryField {
    Title,
    TitleDetail,
    Summary,
    SummaryDetail,
    Description,
    Content,
    Author,
    AuthorDetail,
    Contributors,
    Link,
    Tags,
    Comments,
    Name,
    Publisher,
    PublisherDetail,
    Source,
    Published,
    Updated,
    Created,
}

impl EntryField {
    pub const ALL: [EntryField; 19] = [
        EntryField::Title,
        EntryField::TitleDetail,
        EntryField::Summary,
        EntryField::SummaryDetail,
        EntryField::Description,
        EntryField::Content,
        EntryField::Author,
        EntryField::AuthorDetail,
        EntryField::Contributors,
        EntryField::Link,
        EntryField::Tags,
        EntryField::Comments,
        EntryField::Name,
        EntryField::Publisher,
        EntryField::PublisherDetail,
        EntryField::Source,
        EntryField::Published,
        EntryField::Updated,
        EntryField::Created,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryField::Title => "title",
            EntryField::TitleDetail => "title_detail",
            EntryField::Summary => "summary",
            EntryField::SummaryDetail => "summary_detail",
            EntryField::Description => "description",
            EntryField::Content => "content",
            EntryField::Author => "author",
            EntryField::AuthorDetail => "author_detail",
            EntryField::Contributors => "contributors",
            EntryField::Link => "link",
            EntryField::Tags => "tags",
            EntryField::Comments => "comments",
            EntryField::Name => "name",
            EntryField::Publisher => "publisher",
            EntryField::PublisherDetail => "publisher_detail",
            EntryField::Source => "source",
            EntryField::Published => "published",
            EntryField::Updated => "updated",
            EntryField::Created => "created",
        }
    }

    /// Whether a match rule may target this field (everything except time fields).
    pub fn is_text(self) -> bool {
        !matches!(
            self,
            EntryField::Published | EntryField::Updated | EntryField::Created
        )
    }

    /// Fields that carry markup-free values and must not be HTML-scrubbed when rendered.
    pub fn keeps_markup(self) -> bool {
        matches!(
            self,
            EntryField::Link | EntryField::Source | EntryField::Published | EntryField::Updated
        )
    }

    /// All fields a match rule may target, in display order.
    pub fn text_fields() -> impl Iterator<Item = EntryField> {
        Self::ALL.into_iter().filter(|f| f.is_text())
    }
}

impl fmt::Display for EntryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown entry field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for EntryField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == name)
            .ok_or_else(|| UnknownField(s.to_owned()))
    }
}

/// Value stored under an entry field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Record(BTreeMap<String, String>),
}

impl FieldValue {
    /// Empty strings, lists and records count as absent.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Record(map) => map.is_empty(),
        }
    }
}

/// One item of a feed, as a field-name → value mapping plus its structured times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    fields: HashMap<EntryField, FieldValue>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; empty values are dropped so absence stays uniform.
    pub fn with(mut self, field: EntryField, value: FieldValue) -> Self {
        self.insert(field, value);
        self
    }

    pub fn with_text(self, field: EntryField, value: impl Into<String>) -> Self {
        self.with(field, FieldValue::Text(value.into()))
    }

    pub fn with_published(mut self, at: DateTime<Utc>) -> Self {
        self.set_published(Some(at));
        self
    }

    pub fn with_updated(mut self, at: DateTime<Utc>) -> Self {
        self.set_updated(Some(at));
        self
    }

    pub fn insert(&mut self, field: EntryField, value: FieldValue) {
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn set_published(&mut self, at: Option<DateTime<Utc>>) {
        self.published = at;
        self.set_time_field(EntryField::Published, at);
    }

    pub fn set_updated(&mut self, at: Option<DateTime<Utc>>) {
        self.updated = at;
        self.set_time_field(EntryField::Updated, at);
    }

    fn set_time_field(&mut self, field: EntryField, at: Option<DateTime<Utc>>) {
        match at {
            // RFC 2822 layout without to_rfc2822(), which panics outside years 0..=9999
            Some(at) => self.insert(
                field,
                FieldValue::Text(at.format("%a, %d %b %Y %H:%M:%S %z").to_string()),
            ),
            None => {
                self.fields.remove(&field);
            }
        }
    }

    pub fn get(&self, field: EntryField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Looks a field up by name; unknown names resolve to absent.
    pub fn get_by_name(&self, name: &str) -> Option<&FieldValue> {
        name.parse::<EntryField>().ok().and_then(|f| self.get(f))
    }

    /// Shortcut for string-valued fields.
    pub fn text(&self, field: EntryField) -> Option<&str> {
        match self.get(field)? {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
