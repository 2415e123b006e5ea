//! A small header multimap shared by requests and responses.
//!
//! Header names are case-insensitive and stored lowercased. A name may carry
//! any number of values; the order of values under one name is not
//! significant to the transport.
//!
//! Native stacks hand back header blocks as arbitrary text, which may not be
//! valid for [`http::HeaderMap`]. Such headers are kept as strings here, and
//! [`HeaderMap`] is only used on the wire side, where
//! [`Headers::to_header_map`] validates them.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

/// Header multimap for [`Request`](crate::Request) and [`Response`](crate::Response).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value under `name`, keeping any values already present.
    pub fn add(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace every value under `name` with `value`.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values stored under `name`.
    pub fn get_all(&self, name: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Whether any value is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove and return every value stored under `name`.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Number of `(name, value)` pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Returns `true` if no header is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs, grouped by name.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            names: self.entries.iter(),
            current: None,
        }
    }

    /// Add every pair of `other` to this map.
    pub fn merge(&mut self, other: Headers) {
        for (name, values) in other.entries {
            self.entries.entry(name).or_default().extend(values);
        }
    }

    /// Parse a raw CRLF header block as produced by native HTTP stacks.
    ///
    /// The first line (the status line) is skipped. Each following line must be
    /// `name: value`; parsing stops at the first line without a colon, keeping
    /// whatever was parsed before it.
    pub fn parse_raw(block: &str) -> Self {
        let mut headers = Headers::new();
        for line in block.split("\r\n").skip(1) {
            if line.is_empty() {
                break;
            }

            let Some((name, value)) = line.split_once(':') else {
                tracing::trace!(%line, "stopping at malformed header line");
                break;
            };

            headers.add(name, value.trim_start_matches(' '));
        }
        headers
    }

    /// Convert to an [`http::HeaderMap`] for transports built on the `http` crate.
    pub fn to_header_map(&self) -> Result<HeaderMap, InvalidHeader> {
        let mut map = HeaderMap::with_capacity(self.len());
        for (name, value) in self.iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| InvalidHeader(name.to_owned()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| InvalidHeader(name.to_owned()))?;
            map.append(header_name, header_value);
        }
        Ok(map)
    }
}

impl From<&HeaderMap> for Headers {
    /// Values that are not visible ASCII are dropped.
    fn from(map: &HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                headers.add(name.as_str(), value);
            }
        }
        headers
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the `(name, value)` pairs of a [`Headers`] map.
#[derive(Debug)]
pub struct Iter<'a> {
    names: btree_map::Iter<'a, String, Vec<String>>,
    current: Option<(&'a str, std::slice::Iter<'a, String>)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((name, values)) = self.current.as_mut() {
                if let Some(value) = values.next() {
                    return Some((*name, value.as_str()));
                }
            }

            let (name, values) = self.names.next()?;
            self.current = Some((name.as_str(), values.iter()));
        }
    }
}

/// A header name or value could not be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid header: {0}")]
pub struct InvalidHeader(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_values_per_name() {
        let mut headers = Headers::new();
        headers.add("Accept", "text/plain");
        headers.add("accept", "application/json");
        headers.add("Content-Type", "application/bond-compact-binary");

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get_all("ACCEPT").count(), 2);
        assert_eq!(headers.get("content-type"), Some("application/bond-compact-binary"));

        headers.set("accept", "*/*");
        assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["*/*"]);
    }

    #[test]
    fn parse_raw_block() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nX-Trace:   abc\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n";
        let headers = Headers::parse_raw(raw);

        assert_eq!(headers.get("content-length"), Some("12"));
        assert_eq!(headers.get("x-trace"), Some("abc"));
        assert_eq!(headers.get_all("set-cookie").count(), 2);
    }

    #[test]
    fn parse_raw_keeps_prefix_before_malformed_line() {
        let raw = "HTTP/1.1 503 Service Unavailable\r\nRetry-After: 10\r\ngarbage line\r\nX-Lost: yes\r\n";
        let headers = Headers::parse_raw(raw);

        assert_eq!(headers.get("retry-after"), Some("10"));
        assert!(!headers.contains("x-lost"));
    }

    #[test]
    fn native_names_outside_http_grammar_are_kept() {
        let raw = "HTTP/1.1 200 OK\r\nP3P Policy: CP=\"NOI\"\r\nDate: today\r\n\r\n";
        let headers = Headers::parse_raw(raw);

        assert_eq!(headers.get("p3p policy"), Some("CP=\"NOI\""));
        assert_eq!(headers.get("date"), Some("today"));
        assert_eq!(
            headers.to_header_map().unwrap_err(),
            InvalidHeader("p3p policy".into())
        );
    }

    #[test]
    fn header_map_conversion() {
        let headers: Headers = [("Content-Encoding", "gzip"), ("Client-Id", "NO_AUTH")]
            .into_iter()
            .collect();

        let map = headers.to_header_map().unwrap();
        assert_eq!(map.get("client-id").unwrap(), "NO_AUTH");
        assert_eq!(Headers::from(&map), headers);

        let mut bad = Headers::new();
        bad.add("bad header", "value");
        assert_eq!(
            bad.to_header_map().unwrap_err(),
            InvalidHeader("bad header".into())
        );
    }
}
