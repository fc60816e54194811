//! Canonical text encoding for fact values
//!
//! Every piece of text that ends up in a fact value goes through here so
//! callers only ever see UTF-8 with `\n` line endings and no byte order
//! mark, regardless of how the producing tool encoded its output.

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Decode raw bytes into canonical UTF-8 text
///
/// UTF-16 input is recognised by its byte order mark. Anything else is
/// treated as UTF-8, with invalid sequences replaced by U+FFFD.
pub fn decode_text(bytes: &[u8]) -> String {
    let decoded = if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        decode_utf16(rest, u16::from_le_bytes)
    } else if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        decode_utf16(rest, u16::from_be_bytes)
    } else {
        String::from_utf8_lossy(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)).into_owned()
    };

    normalize_text(&decoded)
}

/// Normalize text that is already UTF-8
pub fn normalize_text(text: &str) -> String {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    if text.contains('\r') {
        text.replace("\r\n", "\n")
    } else {
        text.to_string()
    }
}

/// Normalize captured command output
///
/// Surrounding whitespace is stripped. Output that is empty after
/// stripping counts as no output.
pub fn normalize_output(bytes: &[u8]) -> Option<String> {
    let text = decode_text(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| from_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
