use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub(crate) const REDACTED: &str = "***";

/// A write-only string value (passwords, passphrases, keys).
///
/// Debug, Display and Serialize all render `***`; the raw value is only
/// reachable through [`Secret::expose`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    pub fn expose(&self) -> &str { &self.0 }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub const REDACTED: &'static str = REDACTED;
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(REDACTED) }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(REDACTED) }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(REDACTED) }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d).map(Secret)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for Secret {
    fn from(s: String) -> Self { Self(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_renders_raw_value() {
        let s = Secret::new("hunter2");
        assert_eq!(format!("{}", s), "***");
        assert_eq!(format!("{:?}", s), "***");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"***\"");
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn deserializes_raw_value() {
        let s: Secret = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(s.expose(), "admin");
    }
}
