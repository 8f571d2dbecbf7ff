use std::fmt;
use std::ops::Deref;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A WAMP URI or CURIE, e.g. `"com.example.proc"` or `"calc:add"`.
///
/// Wraps a plain `String` the same way the teacher's `messages::types::value::URI`
/// wraps WAMP v2 URIs, giving protocol-identifier fields a distinct type from
/// opaque JSON payload strings while still (de)serializing as a bare JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri(pub String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Uri {
        Uri(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Uri {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Uri {
        Uri(s.to_string())
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Uri {
        Uri(s)
    }
}

impl Serialize for Uri {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D>(deserializer: D) -> Result<Uri, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UriVisitor;

        impl<'de> de::Visitor<'de> for UriVisitor {
            type Value = Uri;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a WAMP URI or CURIE string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Uri, E>
            where
                E: de::Error,
            {
                Ok(Uri(value.to_string()))
            }
        }

        deserializer.deserialize_str(UriVisitor)
    }
}
