use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::{Entry, EntryField, FieldValue};
use crate::util::{html_to_text, strip_control_chars, truncate_chars};

pub const DEFAULT_TEMPLATE: &str = "$title\n$link";

const MAX_CONTENT_CHARS: usize = 2000;
const MAX_EMBED_DESCRIPTION_CHARS: usize = 4096;
const MAX_EMBED_TITLE_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A chat message ready for a [`DeliverySink`](super::DeliverySink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Message text; only the role mentions when the body is in `embed`
    pub content: String,
    pub embed: Option<Embed>,
    pub role_mentions: Vec<u64>,
}

/// Formats one entry.
///
/// The template (default `$title\n$link`) is filled from the entry's fields; the
/// result goes into an embed or directly into the message text, prefixed with
/// role mentions either way.
pub fn render(
    entry: &Entry,
    template: Option<&str>,
    use_embed: bool,
    role_mentions: &[u64],
) -> RenderedMessage {
    let body = substitute(template.unwrap_or(DEFAULT_TEMPLATE), entry);
    let mentions = role_mentions
        .iter()
        .map(|id| format!("<@&{id}>"))
        .collect::<Vec<_>>()
        .join(" ");

    if use_embed {
        let title = field_text(entry, EntryField::Title)
            .map(|t| truncate_chars(&t, MAX_EMBED_TITLE_CHARS).into_owned());
        let embed = Embed {
            title,
            url: entry.text(EntryField::Link).map(str::to_owned),
            description: truncate_chars(&body, MAX_EMBED_DESCRIPTION_CHARS).into_owned(),
            timestamp: entry.published().or_else(|| entry.updated()),
        };
        return RenderedMessage {
            content: mentions,
            embed: Some(embed),
            role_mentions: role_mentions.to_vec(),
        };
    }

    let content = if mentions.is_empty() {
        body
    } else {
        format!("{mentions}\n{body}")
    };
    RenderedMessage {
        content: truncate_chars(&content, MAX_CONTENT_CHARS).into_owned(),
        embed: None,
        role_mentions: role_mentions.to_vec(),
    }
}

/// Fills `$name` and `${name}` placeholders from entry fields.
///
/// `$$` is a literal dollar sign. Placeholders naming unknown or absent fields
/// are left exactly as written.
pub fn substitute(template: &str, entry: &Entry) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        let value = name
            .parse::<EntryField>()
            .ok()
            .and_then(|field| field_text(entry, field));
        match value {
            Some(value) if !name.is_empty() => {
                out.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Text form of a field for templates: HTML scrubbed unless the field is a
/// URL or time, control characters stripped.
fn field_text(entry: &Entry, field: EntryField) -> Option<String> {
    let raw = match entry.get(field)? {
        FieldValue::Text(s) => s.clone(),
        FieldValue::List(items) => items.join(", "),
        FieldValue::Record(record) => ["value", "name", "href"]
            .iter()
            .find_map(|key| record.get(*key))?
            .clone(),
    };
    let text = if field.keeps_markup() {
        raw
    } else {
        html_to_text(&raw).into_owned()
    };
    Some(strip_control_chars(&text).into_owned())
}
