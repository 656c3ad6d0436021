//! Strongly-typed identifiers for docshelf records.
//!
//! Every ID wraps a ULID and renders as `<prefix>_<ulid>`, e.g.
//! `usr_01HV3K8Z6Q9W7Y2T5R4M1N0PXE`. The prefixed form is also the
//! serialized and stored form, so an ID copied out of a log line, a JSON
//! response or a database row parses back the same way.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when a string is not a valid ID of the requested kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the ID type being parsed, e.g. `"UserId"`.
    pub kind: &'static str,
    pub input: String,
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.kind, self.input, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Splits `input` into its ULID part.
///
/// Accepts `<prefix>_<ulid>` and a bare ULID. Any other prefix is an error
/// so IDs of one kind are never silently accepted as another.
fn parse_prefixed(kind: &'static str, prefix: &str, input: &str) -> Result<Ulid, ParseIdError> {
    let fail = |reason: String| ParseIdError {
        kind,
        input: input.to_string(),
        reason,
    };

    let raw = match input.split_once('_') {
        Some((found, rest)) if found == prefix => rest,
        Some((found, _)) => return Err(fail(format!("expected prefix '{prefix}', found '{found}'"))),
        None => input,
    };
    Ulid::from_string(raw).map_err(|e| fail(e.to_string()))
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mints a new ID for the current instant.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(stringify!($name), Self::PREFIX, s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a user.
    UserId,
    "usr"
);

define_id!(
    /// Unique identifier for a documentation project.
    ProjectId,
    "prj"
);

define_id!(
    /// Unique identifier for an API token record (not the secret itself).
    TokenId,
    "tok"
);

define_id!(
    /// Unique identifier for an external-group to project mapping.
    GroupMappingId,
    "gmap"
);

define_id!(
    /// Unique identifier for a global access rule.
    GlobalAccessRuleId,
    "gar"
);
