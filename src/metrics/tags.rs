//! Tag canonicalization.
//!
//! A tag mapping is encoded as `key:value` pairs sorted by key and joined
//! with `|`. Separators inside keys and values are escaped with `\`, so
//! two mappings share a signature exactly when they are equal, which makes
//! the signature usable as an aggregation key.

use crate::core::{MetricsError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Dimension key/value pairs attached to an observation
pub type Tags = BTreeMap<String, String>;

const PAIR_SEPARATOR: char = '|';
const KV_SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Canonical string form of a tag mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSignature(Arc<str>);

impl TagSignature {
    /// Signature of the empty tag mapping
    pub fn empty() -> Self {
        Self(Arc::from(""))
    }

    /// Encode an iterator of tag pairs; input order does not matter
    pub fn encode<'a, I>(tags: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut pairs: Vec<_> = tags.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::new();
        for (i, (key, value)) in pairs.into_iter().enumerate() {
            if i > 0 {
                out.push(PAIR_SEPARATOR);
            }
            push_escaped(&mut out, key, true);
            out.push(KV_SEPARATOR);
            push_escaped(&mut out, value, false);
        }
        Self(Arc::from(out))
    }

    /// Rebuild the tag mapping.
    ///
    /// Each pair splits at its first unescaped `:`; a pair without one
    /// decodes to a key with an empty value.
    pub fn decode(&self) -> Tags {
        let mut tags = Tags::new();
        if self.0.is_empty() {
            return tags;
        }

        let mut key = String::new();
        let mut value = String::new();
        let mut in_value = false;
        let mut chars = self.0.chars();
        while let Some(c) = chars.next() {
            let literal = match c {
                ESCAPE => chars.next(),
                PAIR_SEPARATOR => {
                    tags.insert(std::mem::take(&mut key), std::mem::take(&mut value));
                    in_value = false;
                    None
                },
                KV_SEPARATOR if !in_value => {
                    in_value = true;
                    None
                },
                _ => Some(c),
            };
            if let Some(literal) = literal {
                if in_value {
                    value.push(literal);
                } else {
                    key.push(literal);
                }
            }
        }
        tags.insert(key, value);
        tags
    }

    /// True for the signature of an empty mapping
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw signature text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Append `raw`, escaping the escape char, `|` and (in keys) `:`
fn push_escaped(out: &mut String, raw: &str, is_key: bool) {
    for c in raw.chars() {
        if c == ESCAPE || c == PAIR_SEPARATOR || (is_key && c == KV_SEPARATOR) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

impl From<&Tags> for TagSignature {
    fn from(tags: &Tags) -> Self {
        Self::encode(tags)
    }
}

impl Default for TagSignature {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for TagSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse `"key:value"` strings into a tag mapping
pub fn parse_tag_kvs<I, S>(kvs: I) -> Result<Tags>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags = Tags::new();
    for kv in kvs {
        let kv = kv.as_ref();
        let (key, value) = kv
            .split_once(KV_SEPARATOR)
            .ok_or_else(|| MetricsError::invalid_tag(format!("expected key:value, got '{}'", kv)))?;
        if key.is_empty() {
            return Err(MetricsError::invalid_tag(format!("empty tag key in '{}'", kv)));
        }
        tags.insert(key.to_string(), value.to_string());
    }
    Ok(tags)
}

/// Merge call-site tags over base tags; call-site values win on collision
pub fn merge_tags(base: &Tags, call_site: &Tags) -> Tags {
    let mut merged = base.clone();
    for (key, value) in call_site {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Build a tag mapping from borrowed pairs
pub fn tags_from_pairs(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
