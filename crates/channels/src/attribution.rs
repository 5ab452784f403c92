//! Attribution markers naming the caller who triggered a generation.
//!
//! Persona messages are posted by a webhook, so the platform shows no trace
//! of which human asked for them. A trailing marker line records it. When a
//! message is edited or rerolled the marker of the *original* message wins,
//! so a reroll by someone else doesn't steal the attribution.

use std::sync::LazyLock;

use chorus_core::{HasAuthor, HasContent};
use regex_lite::Regex;

/// Platform limit on message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Longest requester name kept in a marker, in characters.
pub const MAX_REQUESTER_CHARS: usize = 100;

const MARKER_PREFIX: &str = "-# Requested by ";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^-# Requested by (.+)$").expect("marker pattern is valid")
});

/// The marker line for a requester. The name is cut at its first line
/// break and to [`MAX_REQUESTER_CHARS`].
pub fn marker(requester: &str) -> String {
    let name: String = requester
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(MAX_REQUESTER_CHARS)
        .collect();
    format!("{MARKER_PREFIX}{name}")
}

/// The requester recorded in `content`, if any (last marker wins).
pub fn parse_requester(content: &str) -> Option<String> {
    MARKER
        .captures_iter(content)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// The original requester of `prior`, falling back to `caller`'s name.
pub fn resolve_requester(prior: Option<&dyn HasContent>, caller: &dyn HasAuthor) -> String {
    prior
        .and_then(|message| parse_requester(message.content()))
        .unwrap_or_else(|| caller.author_name().to_string())
}

/// Remove marker lines, e.g. before feeding a message back as history.
pub fn strip(content: &str) -> String {
    content
        .lines()
        .filter(|line| !MARKER.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

/// Append the marker for `requester`, clipping the body so the whole
/// message stays within [`MAX_MESSAGE_CHARS`].
pub fn compose(body: &str, requester: &str) -> String {
    let marker = marker(requester);
    let budget = MAX_MESSAGE_CHARS.saturating_sub(marker.chars().count() + 1);
    let body = strip(body);
    let clipped = match body.char_indices().nth(budget) {
        Some((cut, _)) => &body[..cut],
        None => body.as_str(),
    };
    format!("{}\n{marker}", clipped.trim_end())
}
