//! Text helpers shared by rendering and logging.

mod text;

pub use text::{html_to_text, strip_control_chars, truncate_chars};
