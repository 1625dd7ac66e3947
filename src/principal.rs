//! Caller identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque caller identity: a token `sub`, an API key's owning principal,
/// or a ledger account owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Identity given to every caller when authentication is disabled
    pub const ANONYMOUS: &'static str = "anonymous";

    /// Wrap a principal string
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The anonymous principal
    #[must_use]
    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    /// Whether this is the anonymous principal
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0 == Self::ANONYMOUS
    }

    /// Borrow as `&str`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Principal {
    fn from(value: String) -> Self {
        Self(value)
    }
}
