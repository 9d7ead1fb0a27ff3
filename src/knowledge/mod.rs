//! Retrieval and connection-discovery core.
//!
//! Everything here is synchronous over a `rusqlite::Connection`. Async callers wrap
//! these functions in `tokio::task::spawn_blocking`.

pub mod chunks;
pub mod codec;
pub mod concepts;
pub mod connections;
pub mod entities;
pub mod hybrid;
pub mod keyword;
pub mod refresh;
pub mod reindex;
pub mod similarity;
pub mod stats;
pub mod types;
pub mod unexpected;

/// Characters of text shown in a result preview.
const PREVIEW_CHARS: usize = 160;

/// A single-line preview of `text`, cut on a char boundary.
pub(crate) fn preview(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
