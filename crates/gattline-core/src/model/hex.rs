// Hex rendering and parsing for payload bytes.

use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("odd number of hex digits in '{0}'")]
    OddLength(String),
    #[error("invalid hex digit '{digit}' in '{input}'")]
    InvalidDigit { digit: char, input: String },
}

/// Render bytes as lowercase hex, optionally separated.
pub fn format_hex(bytes: &[u8], separator: Option<char>) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            if let Some(sep) = separator {
                out.push(sep);
            }
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Parse hex with an optional `0x` prefix and `:`, `-` or whitespace separators.
pub fn parse_hex(raw: &str) -> Result<Vec<u8>, HexError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let digits: Vec<char> = body
        .chars()
        .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
        .collect();
    if let Some(bad) = digits.iter().find(|c| !c.is_ascii_hexdigit()) {
        return Err(HexError::InvalidDigit {
            digit: *bad,
            input: raw.to_owned(),
        });
    }
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(raw.to_owned()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair.first().and_then(|c| c.to_digit(16));
            let lo = pair.get(1).and_then(|c| c.to_digit(16));
            match (hi, lo) {
                (Some(hi), Some(lo)) => u8::try_from(hi * 16 + lo)
                    .map_err(|_| HexError::OddLength(raw.to_owned())),
                _ => Err(HexError::OddLength(raw.to_owned())),
            }
        })
        .collect()
}
