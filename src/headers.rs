use std::collections::{hash_map, HashMap};

/// A case-insensitive header map.
///
/// Keys are normalized to lowercase per RFC 7230 on every operation, so
/// `headers.get("ETag")` and `headers.get("etag")` are equivalent. Values are
/// single-valued: inserting an existing name replaces the previous value,
/// which matches how the cache stores response headers on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any existing value for that name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Retrieves the value for a header name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Removes a header name and its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&name.to_ascii_lowercase())
    }

    /// Checks whether a header name is present.
    pub fn contains_key(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of headers in the map.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over `(name, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every header from `other` into `self`, replacing clashes.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a String);
    type IntoIter = hash_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}
