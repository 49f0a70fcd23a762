//! Raw message → `NormalizedEmail`.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{MessagePart, NormalizedEmail, RawMessage};

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Flatten a raw message into subject/from/date/body/id.
///
/// Missing headers become empty strings. The body is taken from the payload
/// itself when it carries data, otherwise from the first text part.
pub fn normalize(raw: &RawMessage) -> NormalizedEmail {
    let payload = &raw.payload;
    let header = |name: &str| payload.header(name).unwrap_or_default().to_string();

    NormalizedEmail {
        subject: header("Subject"),
        from: header("From"),
        date: header("Date"),
        body: strip_html(&extract_body(payload)),
        message_id: raw.id.clone(),
    }
}

fn extract_body(payload: &MessagePart) -> String {
    if let Some(text) = payload.decoded_body() {
        return text;
    }

    // Direct children first, then nested multiparts in document order.
    payload
        .parts
        .iter()
        .filter(|p| p.is_text())
        .find_map(MessagePart::decoded_body)
        .or_else(|| first_nested_text(&payload.parts))
        .unwrap_or_default()
}

fn first_nested_text(parts: &[MessagePart]) -> Option<String> {
    parts.iter().find_map(|part| {
        part.parts
            .iter()
            .filter(|p| p.is_text())
            .find_map(MessagePart::decoded_body)
            .or_else(|| first_nested_text(&part.parts))
    })
}

/// Remove tags and collapse whitespace. Entities are left as-is.
pub fn strip_html(html: &str) -> String {
    let without_tags = TAG.replace_all(html, " ");
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}
