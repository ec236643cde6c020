use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The closed permission scope set.
///
/// `admin` covers every write scope (and, through `x:write ⊇ x:read`,
/// every read scope); API keys may never carry `instance:*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    LibraryRead,
    LibraryWrite,
    LibraryDownload,
    ProgressRead,
    ProgressWrite,
    InstanceRead,
    InstanceWrite,
    Admin,
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown scope: {0}")]
pub struct UnknownScope(pub String);

impl Scope {
    pub const ALL: [Self; 8] = [
        Self::LibraryRead,
        Self::LibraryWrite,
        Self::LibraryDownload,
        Self::ProgressRead,
        Self::ProgressWrite,
        Self::InstanceRead,
        Self::InstanceWrite,
        Self::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LibraryRead => "library:read",
            Self::LibraryWrite => "library:write",
            Self::LibraryDownload => "library:download",
            Self::ProgressRead => "progress:read",
            Self::ProgressWrite => "progress:write",
            Self::InstanceRead => "instance:read",
            Self::InstanceWrite => "instance:write",
            Self::Admin => "admin",
        }
    }

    /// Whether holding `self` grants `other`, including transitively
    /// (`admin → library:write → library:read`).
    pub fn implies(self, other: Self) -> bool {
        if self == other {
            return true;
        }
        match self {
            Self::Admin => other != Self::Admin,
            Self::LibraryWrite => other == Self::LibraryRead,
            Self::ProgressWrite => other == Self::ProgressRead,
            Self::InstanceWrite => other == Self::InstanceRead,
            _ => false,
        }
    }

    /// API keys are not allowed to carry instance scopes.
    pub fn api_key_allowed(self) -> bool {
        !matches!(self, Self::InstanceRead | Self::InstanceWrite)
    }
}

/// Whether any held scope grants the required one.
pub fn granted(held: &[Scope], required: Scope) -> bool {
    held.iter().any(|scope| scope.implies(required))
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str() == value)
            .ok_or_else(|| UnknownScope(value.to_string()))
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
