//! Order-id extraction from email bodies.
//!
//! Quoted history and header blocks are dropped before matching so an id
//! echoed from one of our earlier replies is not taken as a fresh answer.
//! No shape validation happens here; the registry decides what is valid.

use std::sync::LazyLock;

use regex::Regex;

use crate::pipeline::resolver::REPLY_MARKERS;

/// `order id` in any casing or spacing, then the id token.
static ORDER_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\border\s*id[:\s]+([A-Za-z0-9-]+)").expect("valid order id pattern")
});

/// `On <date>, <someone> wrote:` attribution lines.
static ATTRIBUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^On\s.+\swrote:?$").expect("valid attribution pattern")
});

const HEADER_LABELS: &[&str] = &["From:", "Sent:", "To:", "Subject:"];

/// Body with quoted, forwarded and blank lines removed.
pub fn clean_content(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_boilerplate(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_boilerplate(line: &str) -> bool {
    line.starts_with('>')
        || line.starts_with("--")
        || ATTRIBUTION_RE.is_match(line)
        || HEADER_LABELS.iter().any(|label| line.starts_with(label))
        || REPLY_MARKERS.iter().any(|marker| line.contains(marker))
}

/// First order id offered in the new part of `body`.
pub fn extract_order_id(body: &str) -> Option<String> {
    let cleaned = clean_content(body);
    ORDER_ID_RE
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
