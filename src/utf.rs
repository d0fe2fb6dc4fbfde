//! Stateless UTF-8 ⇄ UTF-16 helpers for callers whose text lives in one
//! encoding while the cache keys on the other.
//!
//! These sit outside the cache core; nothing in the tiers depends on them.

use std::char::REPLACEMENT_CHARACTER;

/// Encodes a string as UTF-16 code units.
pub fn utf8_to_utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Number of UTF-16 code units the string encodes to, without allocating.
pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Decodes UTF-16 code units to a string, replacing unpaired surrogates.
pub fn utf16_to_utf8(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
        .collect()
}

/// Position of the first occurrence of `needle` in `haystack`, in code
/// units. An empty needle matches at 0.
pub fn utf16_find(haystack: &[u16], needle: &[u16]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bmp_and_astral_text() {
        let s = "grün 😀";
        let units = utf8_to_utf16(s);
        assert_eq!(units.len(), utf16_len(s));
        assert_eq!(utf16_to_utf8(&units), s);
    }

    #[test]
    fn lone_surrogate_is_replaced() {
        assert_eq!(utf16_to_utf8(&[0xd800, b'a' as u16]), "\u{fffd}a");
    }

    #[test]
    fn find_reports_code_unit_offset() {
        let haystack = utf8_to_utf16("caret here");
        let needle = utf8_to_utf16("here");
        assert_eq!(utf16_find(&haystack, &needle), Some(6));
        assert_eq!(utf16_find(&haystack, &utf8_to_utf16("x")), None);
        assert_eq!(utf16_find(&haystack, &[]), Some(0));
    }
}
