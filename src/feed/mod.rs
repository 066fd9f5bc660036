//! Feed polling core: fetching, entry modelling and update selection.
//!
//! - `fetcher` - HTTP retrieval with a bounded timeout; failures become `None`
//! - `parser` - `feed-rs` documents converted to [`FeedDocument`]s of [`Entry`] records
//! - `timekey` - minute-granularity ordering keys and per-feed cursors
//! - `matcher` - optional (field, term) filters
//! - `selector` - which entries to deliver and where the cursor moves
//! - `discovery` - finding feeds advertised by a web page
//!
//! # Example
//!
//! ```ignore
//! let document = fetcher.fetch(&sub.url).await?;
//! let selection = select(&document, sub.cursor, sub.match_rule.as_ref(), false);
//! for entry in &selection.entries {
//!     // deliver
//! }
//! db.advance_cursor(&sub.channel, &sub.feed_name, selection.cursor).await?;
//! ```

mod discovery;
mod entry;
mod fetcher;
mod matcher;
mod parser;
mod selector;
mod timekey;

pub use discovery::{discover, DiscoveryError};
pub use entry::{Entry, EntryField, FieldValue, UnknownField};
pub use fetcher::{Fetcher, DEFAULT_FETCH_TIMEOUT};
pub use matcher::{matches, usable_field_list, MatchRule, MatchRuleError};
pub use parser::{parse_document, FeedDocument};
pub use selector::{select, Selection};
pub use timekey::{Cursor, Minute, TimeKey};
