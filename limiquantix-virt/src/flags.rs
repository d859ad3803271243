//! Typed flag and enum parameters.
//!
//! Each type wraps the raw value sent to the daemon. Values outside the
//! named constants can still be built with `from_bits_retain`; the daemon is
//! the authority on what it accepts and rejects the rest with
//! [`VirtError::InvalidArgument`](crate::VirtError::InvalidArgument).
//! Nothing here masks or truncates bits on the way out.

use bitflags::bitflags;
use std::fmt;

use crate::error::{Result, VirtError};

bitflags! {
    /// Flags for starting a domain, either from a descriptor or a definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DomainCreateFlags: u32 {
        const DEFAULT = 0;
        /// Leave the guest CPUs paused after launch.
        const START_PAUSED = 1 << 0;
        /// Destroy the domain when the creating connection closes.
        const START_AUTODESTROY = 1 << 1;
        const START_BYPASS_CACHE = 1 << 2;
        const START_FORCE_BOOT = 1 << 3;
        const START_VALIDATE = 1 << 4;
        const START_RESET_NVRAM = 1 << 5;
    }

    /// Flags for forcibly stopping a domain.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DomainDestroyFlags: u32 {
        const DEFAULT = 0;
        const GRACEFUL = 1 << 0;
        const REMOVE_LOGS = 1 << 1;
    }

    /// Flags for removing a persistent domain definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DomainUndefineFlags: u32 {
        const DEFAULT = 0;
        const MANAGED_SAVE = 1 << 0;
        const SNAPSHOTS_METADATA = 1 << 1;
        const NVRAM = 1 << 2;
        const KEEP_NVRAM = 1 << 3;
        const CHECKPOINTS_METADATA = 1 << 4;
        const TPM = 1 << 5;
        const KEEP_TPM = 1 << 6;
    }

    /// Filters for listing domains. `ALL` applies no filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DomainListFlags: u32 {
        const ALL = 0;
        const ACTIVE = 1 << 0;
        const INACTIVE = 1 << 1;
        const PERSISTENT = 1 << 2;
        const TRANSIENT = 1 << 3;
        const RUNNING = 1 << 4;
        const PAUSED = 1 << 5;
        const SHUTOFF = 1 << 6;
        const OTHER = 1 << 7;
        const MANAGEDSAVE = 1 << 8;
        const NO_MANAGEDSAVE = 1 << 9;
        const AUTOSTART = 1 << 10;
        const NO_AUTOSTART = 1 << 11;
        const HAS_SNAPSHOT = 1 << 12;
        const NO_SNAPSHOT = 1 << 13;
        const HAS_CHECKPOINT = 1 << 14;
        const NO_CHECKPOINT = 1 << 15;
    }

    /// Filters for listing secrets. `ALL` applies no filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SecretListFlags: u32 {
        const ALL = 0;
        const EPHEMERAL = 1 << 0;
        const NO_EPHEMERAL = 1 << 1;
        const PRIVATE = 1 << 2;
        const NO_PRIVATE = 1 << 3;
    }
}

/// Allowlist helpers and hex `Display` shared by every flag set.
macro_rules! flag_helpers {
    ($($name:ident),* $(,)?) => {
        $(
            impl $name {
                /// Every bit named by this version of the crate.
                pub const KNOWN_BITS: u32 = Self::all().bits();

                /// Bits set in `self` that no named constant covers.
                pub const fn unknown_bits(self) -> u32 {
                    self.bits() & !Self::KNOWN_BITS
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{:#x}", self.bits())
                }
            }
        )*
    };
}

flag_helpers!(
    DomainCreateFlags,
    DomainDestroyFlags,
    DomainUndefineFlags,
    DomainListFlags,
    SecretListFlags,
);

/// What a secret is used for; selects how its usage ID is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SecretUsageType(u32);

impl SecretUsageType {
    pub const NONE: Self = Self(0);
    /// Usage ID is a storage volume path.
    pub const VOLUME: Self = Self(1);
    /// Usage ID is a Ceph/RBD usage name.
    pub const CEPH: Self = Self(2);
    /// Usage ID is an iSCSI target.
    pub const ISCSI: Self = Self(3);
    pub const TLS: Self = Self(4);
    pub const VTPM: Self = Self(5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::NONE, "none"),
        (Self::VOLUME, "volume"),
        (Self::CEPH, "ceph"),
        (Self::ISCSI, "iscsi"),
        (Self::TLS, "tls"),
        (Self::VTPM, "vtpm"),
    ];

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The value as the C `int` the libvirt API takes.
    pub fn to_c_int(self) -> Result<i32> {
        i32::try_from(self.0).map_err(|_| {
            VirtError::InvalidArgument(format!("secret usage type {} is out of range", self.0))
        })
    }

    /// Descriptor name of the usage type, if this crate knows it.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES.iter().find(|(t, _)| *t == self).map(|(_, n)| *n)
    }

    /// Parse a descriptor name such as `volume` or `ceph`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(t, _)| *t)
    }
}

impl fmt::Display for SecretUsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "unknown({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bits_cover_named_constants() {
        assert_eq!(DomainCreateFlags::KNOWN_BITS, 0b11_1111);
        assert_eq!(DomainDestroyFlags::KNOWN_BITS, 0b11);
        assert_eq!(SecretListFlags::KNOWN_BITS, 0b1111);
        assert_eq!(DomainUndefineFlags::KNOWN_BITS, 0b111_1111);
        assert_eq!(DomainListFlags::KNOWN_BITS, 0xffff);
    }

    #[test]
    fn test_out_of_range_value_is_preserved() {
        let flags = DomainCreateFlags::from_bits_retain(99);
        assert_eq!(flags.bits(), 99);
        assert_eq!(flags.unknown_bits(), 64);
        assert_eq!(flags.to_string(), "0x63");

        let flags = DomainListFlags::from_bits_retain(1 << 20) | DomainListFlags::ACTIVE;
        assert_eq!(flags.bits(), (1 << 20) | 1);
        assert_eq!(flags.unknown_bits(), 1 << 20);
    }

    #[test]
    fn test_bitor_and_contains() {
        let flags = DomainListFlags::ACTIVE | DomainListFlags::PERSISTENT;
        assert!(flags.contains(DomainListFlags::ACTIVE));
        assert!(!flags.contains(DomainListFlags::INACTIVE));
        assert_eq!(flags.to_string(), "0x5");
    }

    #[test]
    fn test_usage_type_names() {
        assert_eq!(SecretUsageType::from_name("Ceph"), Some(SecretUsageType::CEPH));
        assert_eq!(SecretUsageType::VOLUME.to_string(), "volume");
        assert_eq!(SecretUsageType::from_raw(99).name(), None);
        assert_eq!(SecretUsageType::from_raw(99).to_string(), "unknown(99)");
    }

    #[test]
    fn test_usage_type_c_int_range() {
        assert_eq!(SecretUsageType::VTPM.to_c_int().unwrap(), 5);
        assert_eq!(SecretUsageType::from_raw(i32::MAX as u32).to_c_int().unwrap(), i32::MAX);

        let err = SecretUsageType::from_raw(u32::MAX).to_c_int().unwrap_err();
        assert!(matches!(err, VirtError::InvalidArgument(_)));
    }

    #[test]
    fn test_default_flags_are_empty() {
        assert!(DomainCreateFlags::DEFAULT.is_empty());
        assert_eq!(DomainListFlags::ALL.bits(), 0);
        assert_eq!(SecretListFlags::ALL.unknown_bits(), 0);
    }
}
