//! Alternate keys for resolving resource handles.
//!
//! A domain can be found by its numeric ID, its name or its UUID; a secret
//! by its UUID or by its usage pair. Only the UUID forms are canonical: IDs
//! change across restarts and names are only unique within a daemon.

use std::fmt;

use crate::error::{Result, VirtError};
use crate::flags::SecretUsageType;

/// Key for looking up a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKey<'a> {
    /// Runtime ID, only assigned while the domain is active.
    Id(u32),
    Name(&'a str),
    Uuid(&'a str),
}

impl DomainKey<'_> {
    /// True if the key identifies the domain across restarts and hosts.
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Uuid(_))
    }

    /// Reject keys that cannot match anything.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Id(_) => Ok(()),
            Self::Name(name) if name.is_empty() => Err(VirtError::InvalidArgument(
                "domain name must not be empty".to_string(),
            )),
            Self::Uuid(uuid) if uuid.is_empty() => Err(VirtError::InvalidArgument(
                "domain UUID must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DomainKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id={}", id),
            Self::Name(name) => write!(f, "name={}", name),
            Self::Uuid(uuid) => write!(f, "uuid={}", uuid),
        }
    }
}

/// Key for looking up a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey<'a> {
    Uuid(&'a str),
    /// Usage type plus a usage ID whose meaning depends on the type
    /// (a volume path, a Ceph usage name, an iSCSI target...).
    Usage(SecretUsageType, &'a str),
}

impl SecretKey<'_> {
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Uuid(_))
    }

    /// Reject keys that cannot match anything.
    ///
    /// The usage type is not checked here; the daemon decides which types
    /// it recognizes.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Uuid(uuid) if uuid.is_empty() => Err(VirtError::InvalidArgument(
                "secret UUID must not be empty".to_string(),
            )),
            Self::Usage(_, usage_id) if usage_id.is_empty() => Err(VirtError::InvalidArgument(
                "secret usage ID must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SecretKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "uuid={}", uuid),
            Self::Usage(usage_type, usage_id) => write!(f, "usage={}:{}", usage_type, usage_id),
        }
    }
}
