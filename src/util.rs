//! Utility functions for `nickshift`.
//!
//! Character-aware string clipping shared by the name selector and log output.

/// Clip a string to at most `max_chars` characters without appending anything.
///
/// Counts Unicode scalar values, never bytes, so multi-byte characters are kept
/// whole. Discord measures nickname length the same way.
///
/// # Examples
/// ```
/// use nickshift::util::truncate_chars;
///
/// assert_eq!(truncate_chars("hello", 10), "hello");
/// assert_eq!(truncate_chars("hello world", 5), "hello");
/// assert_eq!(truncate_chars("😀😀😀😀", 2), "😀😀");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Used for log previews of inbound message content.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}
