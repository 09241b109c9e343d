//! Line-based message envelope: `To: `, `Subject: ` and `Body:` markers.

use crate::campaign::log::{LogEntry, timestamp};
use crate::directory::Attributes;

pub const RECIPIENT_MARKER: &str = "To: ";
pub const SUBJECT_MARKER: &str = "Subject: ";
pub const BODY_MARKER: &str = "Body:";

/// A rendered message split into its envelope fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Message {
    pub fn parse(text: &str) -> Self {
        Self {
            recipient: extract_recipient(text),
            subject: extract_subject(text),
            body: extract_body(text),
        }
    }
}

/// Value of the first line starting with `marker`, or empty.
fn header_line(text: &str, marker: &str) -> String {
    text.lines()
        .find_map(|line| line.strip_prefix(marker))
        .unwrap_or_default()
        .to_string()
}

pub fn extract_recipient(text: &str) -> String {
    header_line(text, RECIPIENT_MARKER)
}

pub fn extract_subject(text: &str) -> String {
    header_line(text, SUBJECT_MARKER)
}

/// Every line after the first `Body:` line, each terminated by `\n`.
pub fn extract_body(text: &str) -> String {
    let mut body = String::new();
    let mut in_body = false;
    for line in text.lines() {
        if in_body {
            body.push_str(line);
            body.push('\n');
        } else if line.starts_with(BODY_MARKER) {
            in_body = true;
        }
    }
    body
}

/// Log entry for a message just delivered to the addressee `source`.
pub fn build_entry(rendered: &str, source: &Attributes) -> LogEntry {
    LogEntry::new(
        source,
        &extract_recipient(rendered),
        &extract_subject(rendered),
        &timestamp(),
    )
}
