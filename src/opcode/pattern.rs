//! Byte strings and wildcarded signatures as they appear in declarations

use super::ResolveError;

/// Parses a hex byte string. Whitespace between bytes is optional: `"74 05"` and `"7405"` are the same.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, ResolveError> {
    let digits: String = text.split_whitespace().collect();
    let invalid = || ResolveError::InvalidHex(text.to_string());
    if digits.len() % 2 != 0 || !digits.is_ascii() {
        return Err(invalid());
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid()))
        .collect()
}

/// Parses a signature such as `"8B 0D ?? ?? ?? ?? 74"`. `?` and `??` match any byte.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>, ResolveError> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            ResolveError::InvalidPattern(format!("invalid signature token '{token}': {e}"))
        })?;
        bytes.push(Some(value));
    }

    if bytes.iter().all(Option::is_none) {
        return Err(ResolveError::InvalidPattern(format!(
            "signature '{pattern}' has no concrete bytes"
        )));
    }

    Ok(bytes)
}

/// Offsets of every non-overlapping match of `pattern` in `haystack`
pub fn find_all(haystack: &[u8], pattern: &[Option<u8>]) -> Vec<usize> {
    // anchor on the first concrete byte
    let Some((anchor_index, anchor)) = pattern
        .iter()
        .enumerate()
        .find_map(|(i, b)| b.map(|b| (i, b)))
    else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    let mut next_allowed = 0;
    for hit in memchr::memchr_iter(anchor, haystack) {
        let Some(start) = hit.checked_sub(anchor_index) else {
            continue;
        };
        if start < next_allowed || start + pattern.len() > haystack.len() {
            continue;
        }
        let window = &haystack[start..start + pattern.len()];
        let matched = window
            .iter()
            .zip(pattern)
            .all(|(byte, expected)| expected.map_or(true, |e| e == *byte));
        if matched {
            matches.push(start);
            next_allowed = start + pattern.len();
        }
    }
    matches
}
