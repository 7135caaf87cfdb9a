//! Header block folding for header-only fetches
//!
//! Listing and search fetch only `BODY.PEEK[HEADER.FIELDS (...)]`, which is
//! far cheaper than a full RFC822 fetch. This module turns that raw block
//! into a case-insensitive, single-valued map.
//!
//! A header that appears more than once keeps only its last occurrence.
//! Multi-valued headers (for example duplicated `References` lines) are
//! therefore lossy on this path; full fetches go through `mime` instead.

use std::collections::BTreeMap;

/// Folded header map keyed by lowercase header name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: BTreeMap<String, String>,
}

impl HeaderMap {
    /// Raw (still RFC 2047 encoded) value for a header, case-insensitive
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Value with RFC 2047 encoded words decoded
    pub fn decoded(&self, name: &str) -> Option<String> {
        let raw = self.get(name)?;
        let line = format!("{name}: {raw}");
        match mailparse::parse_header(line.as_bytes()) {
            Ok((header, _)) => Some(header.get_value()),
            Err(_) => Some(raw.to_owned()),
        }
    }
}

/// Fold a raw header block into a [`HeaderMap`]
///
/// Lines starting with a space or tab continue the previous header and are
/// joined with a single space. Other lines are split at the first colon;
/// lines without a colon are ignored. Parsing stops at the first empty line.
pub fn parse_header_block(raw: &str) -> HeaderMap {
    let mut entries = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in raw.lines() {
        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = current.as_mut() {
                let continuation = line.trim();
                if !continuation.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(continuation);
                }
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            entries.insert(name, value);
        }

        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                current = Some((name.to_ascii_lowercase(), value.trim().to_owned()));
            }
        }
    }

    if let Some((name, value)) = current {
        entries.insert(name, value);
    }

    HeaderMap { entries }
}

/// Fold raw header bytes, decoding lossily as UTF-8
pub fn parse_header_bytes(raw: &[u8]) -> HeaderMap {
    parse_header_block(&String::from_utf8_lossy(raw))
}
