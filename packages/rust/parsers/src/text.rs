//! Text helpers shared by the parsers: decoding, `key: value` splitting,
//! and record-block segmentation.

use std::borrow::Cow;

/// Longest key we accept on the left of a `key: value` line.
const MAX_KEY_LEN: usize = 40;

/// Decode raw file bytes. UTF-16 LE with BOM is common in Windows stealer
/// output; everything else is decoded as lossy UTF-8.
pub fn decode(raw: &[u8]) -> Cow<'_, str> {
    if let Some(body) = raw.strip_prefix(&[0xFF, 0xFE]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return Cow::Owned(String::from_utf16_lossy(&units));
    }
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    String::from_utf8_lossy(raw)
}

/// Lower-case a key, drop decoration, and collapse inner whitespace.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '-' | '*' | '>' | '#'))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Split a `key: value` line. Returns the normalized key and trimmed value.
///
/// Lines whose left side is too long or looks like a URL scheme are not
/// key/value lines.
pub fn split_key_value(line: &str) -> Option<(String, &str)> {
    let idx = line.find(':')?;
    let (key, rest) = line.split_at(idx);
    let value = rest[1..].trim();
    if key.trim().is_empty() || key.len() > MAX_KEY_LEN || value.starts_with("//") {
        return None;
    }
    Some((normalize_key(key), value))
}

/// True for rows made only of separator characters (`=====`, `-----`, `|||`).
pub fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3
        && trimmed
            .chars()
            .all(|c| matches!(c, '=' | '-' | '_' | '|' | '*' | '#' | '~'))
}

/// A non-empty value, trimmed.
pub fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// A run of `key: value` pairs that belong to one record.
pub type Block<'a> = Vec<(String, &'a str)>;

/// Group `key: value` lines into records.
///
/// A record ends at a blank line, a separator row, or when a key already
/// present in the current record appears again (dumps that omit blank lines
/// between entries).
pub fn read_blocks(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut current: Block<'_> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() || is_separator(line) {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        if current.iter().any(|(k, _)| *k == key) {
            blocks.push(std::mem::take(&mut current));
        }
        current.push((key, value));
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// First value in `block` whose key is one of `keys`.
pub fn field<'a>(block: &[(String, &'a str)], keys: &[&str]) -> Option<&'a str> {
    block
        .iter()
        .find(|(k, v)| keys.contains(&k.as_str()) && !v.trim().is_empty())
        .map(|(_, v)| v.trim())
}
