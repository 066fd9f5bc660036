use scraper::Html;
use std::borrow::Cow;

/// Ellipsis appended by [`truncate_chars`]
const ELLIPSIS: &str = "...";

/// Truncates `s` to at most `max_chars` characters, ending in "..." when cut.
///
/// Counts Unicode scalar values, which is how chat services measure message
/// limits. Returns `Cow::Borrowed` when nothing needs cutting.
///
/// # Examples
///
/// ```
/// use feedrelay::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// assert_eq!(truncate_chars("Test", 2), "Te");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    let ellipsis_len = ELLIPSIS.chars().count();
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some(_) if max_chars <= ellipsis_len => {
            Cow::Owned(s.chars().take(max_chars).collect())
        }
        Some(_) => {
            let keep = max_chars - ellipsis_len;
            let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
            Cow::Owned(format!("{}{}", s[..end].trim_end(), ELLIPSIS))
        }
    }
}

/// Strips C0 control characters (except tab, newline, carriage return), DEL and
/// ANSI escape sequences.
///
/// Feed content is attacker-controlled; this keeps escape codes and invisible
/// control bytes out of chat messages and logs.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .bytes()
        .any(|b| b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r'));
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                // CSI: ESC [ params final-byte
                if chars.peek() == Some(&'[') {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
            }
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_ascii_control() => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reduces an HTML fragment to its text content.
///
/// Block-level breaks (`<br>`, `<p>`, `<div>`, `<li>`) become newlines; runs of
/// blank lines collapse. Text without markup is returned untouched.
pub fn html_to_text(s: &str) -> Cow<'_, str> {
    if !s.contains('<') && !s.contains('&') {
        return Cow::Borrowed(s);
    }

    // Mark block boundaries before the parser flattens them
    let marked = s
        .replace("<br>", "\n<br>")
        .replace("<br/>", "\n<br/>")
        .replace("<br />", "\n<br />")
        .replace("</p>", "</p>\n")
        .replace("</div>", "</div>\n")
        .replace("<li>", "\n<li>");

    let fragment = Html::parse_fragment(&marked);
    let text: String = fragment.root_element().text().collect();

    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    Cow::Owned(out.trim_end().to_owned())
}
