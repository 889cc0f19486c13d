//! Validated string identifiers.
//!
//! All three identifiers share the same rule: surrounding whitespace is
//! trimmed and the result must be non-empty. They serialize as plain JSON
//! strings and reject empty values on deserialization, so an invalid id can
//! never reach a bucket or a stored document.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier was empty after trimming.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier was being constructed.
        kind: &'static str,
    },
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and construct the identifier.
            ///
            /// # Errors
            ///
            /// Returns [`IdError::Empty`] if `raw` is empty or whitespace.
            pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(IdError::Empty { kind: $kind });
                }
                if trimmed.len() == raw.len() {
                    Ok(Self(raw))
                } else {
                    Ok(Self(trimmed.to_string()))
                }
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identity of a bucket: the piece of content whose viewers are tracked.
    ContentId,
    "content id"
);

string_id!(
    /// Identity of a reviewing owner, used to key checkpoints.
    OwnerId,
    "owner id"
);

string_id!(
    /// Identity of a viewer, stable across duplicate observations.
    ViewerId,
    "viewer id"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let id = ContentId::new("  S1 ").unwrap();
        assert_eq!(id.as_str(), "S1");
    }

    #[test]
    fn rejects_blank() {
        assert_eq!(
            OwnerId::new("   ").unwrap_err(),
            IdError::Empty { kind: "owner id" }
        );
        assert!(ViewerId::new("").is_err());
    }

    #[test]
    fn serde_is_a_plain_string() {
        let id = ViewerId::new("42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        let back: ViewerId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deserialize_rejects_empty() {
        let err = serde_json::from_str::<ContentId>("\"\"").unwrap_err();
        assert!(err.to_string().contains("content id must not be empty"));
    }

    #[test]
    fn borrow_allows_str_lookup() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(ViewerId::new("7").unwrap(), 1);
        assert_eq!(map.get("7"), Some(&1));
    }
}
