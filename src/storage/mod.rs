mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, EmbedOverride, Subscription, MAX_ROLE_MENTIONS};
