use super::entry::Entry;
use super::matcher::{matches, MatchRule};
use super::parser::FeedDocument;
use super::timekey::{Cursor, TimeKey};

/// Entries chosen for delivery and the cursor to persist once they are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<'a> {
    pub entries: Vec<&'a Entry>,
    pub cursor: Cursor,
}

impl Selection<'_> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decides which entries of `document` to deliver.
///
/// Forced selection returns the first entry passing `rule` in document order and
/// leaves the cursor alone. Normal selection returns every entry newer than
/// `cursor` that passes `rule`, oldest first, and moves the cursor to the newest
/// returned key.
pub fn select<'a>(
    document: &'a FeedDocument,
    cursor: Cursor,
    rule: Option<&MatchRule>,
    force: bool,
) -> Selection<'a> {
    if force {
        let entries = document
            .entries
            .iter()
            .find(|e| matches(e, rule))
            .into_iter()
            .collect();
        return Selection { entries, cursor };
    }

    let mut keyed: Vec<(TimeKey, &Entry)> = document
        .entries
        .iter()
        .map(|e| (TimeKey::of(e), e))
        .filter(|(key, e)| cursor.admits(*key) && matches(e, rule))
        .collect();
    // Stable: equal keys keep document order
    keyed.sort_by_key(|(key, _)| *key);

    let cursor = keyed
        .last()
        .map(|(key, _)| Cursor::Seen(*key))
        .unwrap_or(cursor);

    Selection {
        entries: keyed.into_iter().map(|(_, e)| e).collect(),
        cursor,
    }
}
