//! Token entry codec.
//!
//! Serializes lookup tokens into the compact delimited representation stored
//! in the shared token column, one encoded entry per token:
//!
//! ```text
//! code FIELD_SEPARATOR system-slot FIELD_SEPARATOR value-slot
//! ```
//!
//! An absent system or value is a single NULL_MARKER in its slot. The three
//! reserved bytes never occur unescaped in field content: occurrences in
//! input are escaped as ESCAPE plus a printable tag, so encoding is lossless
//! for arbitrary input and decoding is the exact inverse. The condition
//! builder relies on this: entry prefixes built from escaped fields can only
//! match at field boundaries.
//!
//! Entries preserve extraction order, and every token of a resource shares
//! one multi-valued column; tokens with the same code occupy multiple slots,
//! which is the basis for array-aware matching.

use thiserror::Error;

use crate::tokens::LookupToken;

/// Field separator between the code, system, and value slots.
pub const FIELD_SEPARATOR: char = '\u{1}';

/// Marker for an absent system or value slot.
pub const NULL_MARKER: char = '\u{2}';

/// Escape byte for reserved characters occurring in field content.
pub const ESCAPE: char = '\u{3}';

/// Name of the shared multi-valued token column, one per indexed resource.
pub const TOKEN_COLUMN: &str = "tokens";

/// Errors produced while decoding stored token entries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed encoded token entry: {0}")]
    MalformedEntry(String),

    #[error("dangling escape byte in encoded field")]
    DanglingEscape,

    #[error("unknown escape tag '{0}'")]
    UnknownEscapeTag(char),
}

/// Escape reserved bytes in field content.
pub fn escape_field(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            FIELD_SEPARATOR => {
                out.push(ESCAPE);
                out.push('F');
            }
            NULL_MARKER => {
                out.push(ESCAPE);
                out.push('N');
            }
            ESCAPE => {
                out.push(ESCAPE);
                out.push('E');
            }
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_field`].
fn unescape_field(input: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('F') => out.push(FIELD_SEPARATOR),
            Some('N') => out.push(NULL_MARKER),
            Some('E') => out.push(ESCAPE),
            Some(other) => return Err(CodecError::UnknownEscapeTag(other)),
            None => return Err(CodecError::DanglingEscape),
        }
    }
    Ok(out)
}

fn encode_slot(slot: Option<&str>) -> String {
    match slot {
        Some(content) => escape_field(content),
        None => NULL_MARKER.to_string(),
    }
}

fn decode_slot(slot: &str) -> Result<Option<String>, CodecError> {
    if slot.len() == NULL_MARKER.len_utf8() && slot.starts_with(NULL_MARKER) {
        return Ok(None);
    }
    unescape_field(slot).map(Some)
}

/// Encode one token into its stored entry.
pub fn encode_token(token: &LookupToken) -> String {
    let mut entry = escape_field(&token.code);
    entry.push(FIELD_SEPARATOR);
    entry.push_str(&encode_slot(token.system.as_deref()));
    entry.push(FIELD_SEPARATOR);
    entry.push_str(&encode_slot(token.value.as_deref()));
    entry
}

/// Decode one stored entry back into a token.
pub fn decode_token(entry: &str) -> Result<LookupToken, CodecError> {
    let mut fields = entry.split(FIELD_SEPARATOR);
    let (Some(code), Some(system), Some(value), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err(CodecError::MalformedEntry(entry.escape_default().to_string()));
    };
    Ok(LookupToken {
        code: unescape_field(code)?,
        system: decode_slot(system)?,
        value: decode_slot(value)?,
    })
}

/// Encode an ordered token sequence, one entry per token.
pub fn encode_tokens(tokens: &[LookupToken]) -> Vec<String> {
    tokens.iter().map(encode_token).collect()
}

/// Decode an ordered entry sequence back into tokens.
pub fn decode_tokens(entries: &[String]) -> Result<Vec<LookupToken>, CodecError> {
    entries.iter().map(|entry| decode_token(entry)).collect()
}

/// Encoded prefix shared by every entry of a code, optionally pinned to a
/// system. The trailing separator anchors the match at a field boundary.
pub fn entry_prefix(code: &str, system: Option<&str>) -> String {
    let mut prefix = escape_field(code);
    prefix.push(FIELD_SEPARATOR);
    if let Some(system) = system {
        prefix.push_str(&escape_field(system));
        prefix.push(FIELD_SEPARATOR);
    }
    prefix
}
