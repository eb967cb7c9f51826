//! Small shared helpers: timestamps, string bisection, codepoint maps, and
//! outbound message splitting.

use std::time::{SystemTime, UNIX_EPOCH};

/// The longest chat message we will send in one frame, in codepoints.
pub const MAX_MESSAGE_CODEPOINTS: usize = 500;

/// Milliseconds since the unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Split `s` at the first occurrence of `delim`, returning the part before
/// and the part after (without the delimiter). When the delimiter is absent
/// the whole string is the first part.
pub fn bisect(s: &str, delim: char) -> (&str, &str) {
    match s.find(delim) {
        Some(i) => (&s[..i], &s[i + delim.len_utf8()..]),
        None => (s, ""),
    }
}

/// Byte offset of every codepoint in `s`, plus a trailing entry for the end
/// of the string. Maps UTF-32 indices (what the wire tags use) to UTF-8
/// offsets (what we slice with).
pub fn codepoint_byte_offsets(s: &str) -> Vec<usize> {
    let mut out: Vec<usize> = s.char_indices().map(|(i, _)| i).collect();
    out.push(s.len());
    out
}

/// Split an outbound message into chunks of at most
/// [`MAX_MESSAGE_CODEPOINTS`] codepoints, breaking at the last space at or
/// before the limit where possible.
pub fn split_outbound(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;

    loop {
        let offsets = codepoint_byte_offsets(rest);
        if offsets.len() - 1 <= MAX_MESSAGE_CODEPOINTS {
            if !rest.is_empty() {
                out.push(rest.to_string());
            }
            break;
        }

        let limit = offsets[MAX_MESSAGE_CODEPOINTS];
        let cut = match rest[..limit].rfind(' ') {
            Some(i) => i,
            None => limit,
        };

        out.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bisect() {
        assert_eq!(bisect("a b c", ' '), ("a", "b c"));
        assert_eq!(bisect("abc", ' '), ("abc", ""));
        assert_eq!(bisect("", ' '), ("", ""));
    }

    #[test]
    fn test_codepoint_offsets() {
        let offs = codepoint_byte_offsets("aé!");
        assert_eq!(offs, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_outbound("hello"), vec!["hello".to_string()]);
        assert!(split_outbound("").is_empty());
    }

    #[test]
    fn test_split_breaks_at_last_space() {
        let word = "x".repeat(400);
        let text = format!("{word} {word}");
        let parts = split_outbound(&text);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], word);
        assert_eq!(parts[1], word);
    }

    #[test]
    fn test_split_hard_cuts_unbroken_text() {
        let text = "y".repeat(MAX_MESSAGE_CODEPOINTS + 10);
        let parts = split_outbound(&text);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), MAX_MESSAGE_CODEPOINTS);
        assert_eq!(parts[1].chars().count(), 10);
    }
}
