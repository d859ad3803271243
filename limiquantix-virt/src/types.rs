//! Shared value types.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ACCESS MODE
// =============================================================================

/// How a connection was opened. Fixed for the lifetime of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// Queries and mutations are allowed.
    #[default]
    ReadWrite,
    /// Only queries are allowed; define/create/destroy/undefine are refused.
    ReadOnly,
}

impl AccessMode {
    pub fn is_read_only(self) -> bool {
        self == Self::ReadOnly
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "read-write",
            Self::ReadOnly => "read-only",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// VERSION NUMBERS
// =============================================================================

/// Version encoded as `major * 1_000_000 + minor * 1_000 + micro`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

impl VersionNumber {
    pub const fn new(major: u64, minor: u64, micro: u64) -> Self {
        Self(major * 1_000_000 + minor * 1_000 + micro)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn major(self) -> u64 {
        self.0 / 1_000_000
    }

    pub const fn minor(self) -> u64 {
        (self.0 / 1_000) % 1_000
    }

    pub const fn micro(self) -> u64 {
        self.0 % 1_000
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.micro())
    }
}
