//! Property-bag encoding for IoT Hub and DPS topic suffixes
//!
//! Topics carry structured metadata as a URL-encoded bag of properties
//! appended to the topic path. Reserved properties (keys starting with `$`)
//! are always rendered after application properties, while entries keep
//! their relative insertion order within each group.

/// Ordered mapping of property names to optional string values.
///
/// A `None` value renders as a bare flag property (`batch`), a `Some` value
/// renders as `key=value`. Keys are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    entries: Vec<(String, Option<String>)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property, overwriting the value in place if the key exists.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<impl Into<String>>) {
        let key = key.into();
        let value = value.map(Into::into);
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Encode the bag without a leading marker.
    ///
    /// The empty bag encodes to the empty string and a single flag property
    /// encodes to its bare key. Otherwise entries are rendered as
    /// `key` / `key=value` pairs joined with `&`, application properties
    /// first and reserved (`$`-prefixed) properties last.
    pub fn encode(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        if self.entries.len() == 1 && self.entries[0].1.is_none() {
            return percent_encode(&self.entries[0].0);
        }
        let (plain, reserved): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .partition(|(k, _)| !k.starts_with('$'));
        plain
            .into_iter()
            .chain(reserved)
            .map(|(k, v)| match v {
                None => percent_encode(k),
                Some(v) => format!("{}={}", percent_encode(k), percent_encode(v)),
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Encode the bag as a topic suffix, including the leading marker.
    ///
    /// The single-flag form is appended bare (`.../batch`); anything else
    /// non-empty is appended as a query string (`.../?prop1&prop2=x`).
    pub fn topic_suffix(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        if self.entries.len() == 1 && self.entries[0].1.is_none() {
            return self.encode();
        }
        format!("?{}", self.encode())
    }

    /// Parse a query-style suffix (without the leading `?`) back into a bag.
    ///
    /// Inverse of [`encode`](Self::encode): splits on `&` then `=`, entries
    /// without `=` decode to flag properties.
    pub fn decode(query: &str) -> Self {
        let mut bag = PropertyBag::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => bag.insert(percent_decode(k), Some(percent_decode(v))),
                None => bag.insert(percent_decode(pair), None::<String>),
            }
        }
        bag
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Option<V>)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let mut bag = PropertyBag::new();
        for (k, v) in iter {
            bag.insert(k, v);
        }
        bag
    }
}

/// Characters left unescaped by URI-component encoding.
fn is_unescaped(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

/// URI-component percent-encoding (space becomes `%20`, never `+`).
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if is_unescaped(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Inverse of [`percent_encode`]. Malformed escapes are passed through verbatim.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(h), Some(l)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((h * 16 + l) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
