//! Ordered, case-insensitive header storage.
//!
//! Grounded on ureq's `Header` wrapper and `add_header` dedup helper, but
//! generalized: the original hard-codes "don't dedup names starting with
//! `x-`" as its escape hatch for repeatable headers (`Cookie`, custom
//! tracing headers, ...). We expose that choice explicitly as a `multi` flag
//! on `Header::set`/`Header::add` instead of sniffing the name.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A single `Name: Value` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_name(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

impl FromStr for Header {
    type Err = Error;

    /// Parses a single `Name: Value` wire line (without the trailing CRLF),
    /// accepting leading whitespace in the value per obsolete line folding
    /// (the caller is responsible for having already joined continuation
    /// lines onto the value before calling this).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let idx = s
            .find(':')
            .ok_or_else(|| Error::InvalidHeaderLine(s.to_string()))?;
        let name = &s[..idx];
        if name.is_empty() || !name.is_ascii() || name.contains(char::is_whitespace) {
            return Err(Error::InvalidHeaderLine(s.to_string()));
        }
        let value = s[idx + 1..].trim();
        Ok(Header::new(name, value))
    }
}

/// An ordered list of headers. Lookup is case-insensitive; iteration
/// preserves insertion order, matching the wire order they were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    items: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        HeaderList::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.iter().find(|h| h.is_name(name)).map(Header::value)
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.items
            .iter()
            .filter(move |h| h.is_name(name))
            .map(Header::value)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, replacing any existing header of the same name
    /// unless `multi` is set (the spec's §8 idempotence law: repeated calls
    /// to `apply_basic_auth` must *not* dedup, so callers building
    /// `Authorization` pass `multi = true`; `url_encoded_body`'s
    /// `Content-Type` replacement passes `multi = false`).
    pub fn set(&mut self, header: Header, multi: bool) {
        if !multi {
            let name = header.name().to_string();
            self.items.retain(|h| !h.is_name(&name));
        }
        self.items.push(header);
    }

    pub fn remove(&mut self, name: &str) {
        self.items.retain(|h| !h.is_name(name));
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
