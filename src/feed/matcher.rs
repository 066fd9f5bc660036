use thiserror::Error;

use super::entry::{Entry, EntryField, FieldValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchRuleError {
    #[error("field `{0}` cannot be used for matching; use one of: {list}", list = usable_field_list())]
    UnusableField(String),
    #[error("match term must not be empty")]
    EmptyTerm,
}

/// Comma-separated list of the fields a rule may target.
pub fn usable_field_list() -> String {
    EntryField::text_fields()
        .map(EntryField::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Requires `term` to appear in `field` before an entry is delivered.
///
/// Comparison is case-insensitive for both string and list values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    field: EntryField,
    term: String,
}

impl MatchRule {
    pub fn new(field: EntryField, term: impl Into<String>) -> Result<Self, MatchRuleError> {
        if !field.is_text() {
            return Err(MatchRuleError::UnusableField(field.as_str().to_owned()));
        }
        let term = term.into();
        if term.is_empty() {
            return Err(MatchRuleError::EmptyTerm);
        }
        Ok(Self { field, term })
    }

    /// Parses a user-supplied field name.
    pub fn parse(field: &str, term: impl Into<String>) -> Result<Self, MatchRuleError> {
        let field = field
            .parse::<EntryField>()
            .map_err(|_| MatchRuleError::UnusableField(field.to_owned()))?;
        Self::new(field, term)
    }

    pub fn field(&self) -> EntryField {
        self.field
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn is_satisfied_by(&self, entry: &Entry) -> bool {
        let needle = self.term.to_lowercase();
        match entry.get(self.field) {
            None => false,
            Some(value) if value.is_empty() => false,
            Some(FieldValue::Text(text)) => text.to_lowercase().contains(&needle),
            Some(FieldValue::List(items)) => {
                items.iter().any(|item| item.to_lowercase().contains(&needle))
            }
            Some(FieldValue::Record(_)) => false,
        }
    }
}

/// An absent rule accepts every entry.
pub fn matches(entry: &Entry, rule: Option<&MatchRule>) -> bool {
    rule.map_or(true, |rule| rule.is_satisfied_by(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rule(field: EntryField, term: &str) -> MatchRule {
        MatchRule::new(field, term).unwrap()
    }

    #[test]
    fn test_no_rule_matches_empty_entry() {
        assert!(matches(&Entry::new(), None));
    }

    #[test]
    fn test_string_match_is_case_insensitive() {
        let r = rule(EntryField::Title, "foo");
        assert!(matches(&Entry::new().with_text(EntryField::Title, "FooBar"), Some(&r)));
        assert!(!matches(&Entry::new().with_text(EntryField::Title, "bar"), Some(&r)));

        let upper = rule(EntryField::Title, "FOO");
        assert!(matches(&Entry::new().with_text(EntryField::Title, "a foo b"), Some(&upper)));
    }

    #[test]
    fn test_missing_field_does_not_match() {
        let r = rule(EntryField::Author, "alice");
        let entry = Entry::new().with_text(EntryField::Title, "alice in wonderland");
        assert!(!matches(&entry, Some(&r)));
    }

    #[test]
    fn test_list_match_any_element_case_insensitive() {
        let r = rule(EntryField::Tags, "rust");
        let entry = Entry::new().with(
            EntryField::Tags,
            FieldValue::List(vec!["Go".into(), "RustLang".into()]),
        );
        assert!(matches(&entry, Some(&r)));

        let other = Entry::new().with(EntryField::Tags, FieldValue::List(vec!["python".into()]));
        assert!(!matches(&other, Some(&r)));
    }

    #[test]
    fn test_record_values_never_match() {
        let r = rule(EntryField::AuthorDetail, "alice");
        let mut record = BTreeMap::new();
        record.insert("name".to_owned(), "alice".to_owned());
        let entry = Entry::new().with(EntryField::AuthorDetail, FieldValue::Record(record));
        assert!(!matches(&entry, Some(&r)));
    }

    #[test]
    fn test_time_fields_rejected() {
        assert_eq!(
            MatchRule::new(EntryField::Published, "2024"),
            Err(MatchRuleError::UnusableField("published".into()))
        );
        assert!(matches!(
            MatchRule::parse("updated", "x"),
            Err(MatchRuleError::UnusableField(_))
        ));
    }

    #[test]
    fn test_unknown_field_name_rejected() {
        assert_eq!(
            MatchRule::parse("bogus", "x"),
            Err(MatchRuleError::UnusableField("bogus".into()))
        );
    }

    #[test]
    fn test_empty_term_rejected() {
        assert_eq!(
            MatchRule::new(EntryField::Title, ""),
            Err(MatchRuleError::EmptyTerm)
        );
    }

    #[test]
    fn test_error_lists_usable_fields() {
        let msg = MatchRuleError::UnusableField("bogus".into()).to_string();
        assert!(msg.contains("title"));
        assert!(msg.contains("tags"));
        assert!(!msg.contains("published"));
    }
}
