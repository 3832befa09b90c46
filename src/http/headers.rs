use crate::Result;
use crate::error::Error;

/// Ordered request-header collection. Names are matched case-insensitively
/// for lookup but emitted on the wire exactly as the caller wrote them,
/// which `http::HeaderMap` cannot do (it canonicalizes names to lowercase).
/// Parsed response headers stay in `HeaderMap`; only lookup semantics are
/// observable on that side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates name and value against the token/field grammar and appends.
    /// Duplicate names accumulate in insertion order.
    pub fn try_append(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        let value = value.into();
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(Error::Protocol {
                message: format!("invalid header name: {name}"),
            });
        }
        if http::HeaderValue::from_bytes(value.as_bytes()).is_err() {
            return Err(Error::Protocol {
                message: format!("invalid header value for {name}"),
            });
        }
        self.entries.push((name, value));
        Ok(())
    }

    /// Case-insensitive lookup; the last occurrence wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(entry, _)| entry.eq_ignore_ascii_case(name))
    }

    /// Removes every occurrence of `name`, matched case-insensitively.
    pub fn remove(&mut self, name: &str) {
        self.entries
            .retain(|(entry, _)| !entry.eq_ignore_ascii_case(name));
    }

    /// Entries in insertion order, names as originally given.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
