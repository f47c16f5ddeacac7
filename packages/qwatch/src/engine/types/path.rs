use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(SmolStr),
    Index(usize),
}

/// Dotted/indexed path into a JSON document, e.g. `user.tags[0].name`.
///
/// Parsed once at compile time; the raw text is kept for rendering so the
/// canonical query text and the fingerprint see exactly what the user wrote.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JsonPath {
    raw: SmolStr,
    segments: Vec<PathSegment>,
}

impl JsonPath {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (field, mut rest) = match part.find('[') {
                Some(idx) => (&part[..idx], &part[idx..]),
                None => (part, ""),
            };

            if field.is_empty() && rest.is_empty() {
                return None;
            }
            if !field.is_empty() {
                if field.contains(']') || field.chars().any(char::is_whitespace) {
                    return None;
                }
                segments.push(PathSegment::Field(SmolStr::new(field)));
            }

            while !rest.is_empty() {
                let close = rest.find(']')?;
                let index = rest[1..close].parse::<usize>().ok()?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return None;
                }
            }
        }

        Some(JsonPath {
            raw: SmolStr::new(raw),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the document. `None` when any segment is absent.
    #[inline]
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Field(name), Value::Object(map)) => map.get(name.as_str())?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for JsonPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        JsonPath::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid JSON path: {}", s)))
    }
}
