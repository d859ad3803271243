//! Transport abstraction between the handle layer and a hypervisor daemon.
//!
//! The handle layer in [`crate::connection`] owns reference counting,
//! access-mode checks and handle validity. Everything behind these traits is
//! the daemon's business: parsing descriptors, validating flags, tracking
//! domain and secret state. Implementations must return classified
//! [`VirtError`](crate::VirtError)s and never cache authoritative state.

use std::sync::Arc;

use crate::error::Result;
use crate::flags::*;
use crate::lookup::{DomainKey, SecretKey};
use crate::types::AccessMode;

/// Entry point of a transport: resolves URIs into sessions.
pub trait Driver: Send + Sync {
    /// Short name for logs (e.g., "libvirt", "mock").
    fn name(&self) -> &str;

    /// URI used when the caller and the configuration name none.
    fn default_uri(&self) -> &str;

    /// Open a session. Fails with `InvalidUri` if the URI cannot be resolved.
    fn open(&self, uri: &str, mode: AccessMode) -> Result<Arc<dyn Session>>;
}

/// One open session with the daemon.
pub trait Session: Send + Sync {
    // =========================================================================
    // Session
    // =========================================================================

    /// Release the session. Called exactly once, when the last reference goes.
    fn close(&self) -> Result<()>;

    fn is_alive(&self) -> Result<bool>;

    fn is_encrypted(&self) -> Result<bool>;

    fn is_secure(&self) -> Result<bool>;

    // =========================================================================
    // Host metadata
    // =========================================================================

    fn hypervisor_version(&self) -> Result<u64>;

    fn library_version(&self) -> Result<u64>;

    fn capabilities(&self) -> Result<String>;

    fn hostname(&self) -> Result<String>;

    /// Host SMBIOS data. Restricted scopes answer `Unsupported`.
    fn sysinfo(&self) -> Result<String>;

    fn hypervisor_type(&self) -> Result<String>;

    fn uri(&self) -> Result<String>;

    fn cpu_model_names(&self, arch: &str) -> Result<Vec<String>>;

    fn max_vcpus(&self, kind: &str) -> Result<u32>;

    // =========================================================================
    // Domains
    // =========================================================================

    /// Store a persistent, inactive definition.
    fn define_domain(&self, xml: &str) -> Result<Box<dyn RemoteDomain>>;

    /// Launch a transient domain.
    fn create_domain(&self, xml: &str, flags: DomainCreateFlags) -> Result<Box<dyn RemoteDomain>>;

    fn list_domains(&self, flags: DomainListFlags) -> Result<Vec<Box<dyn RemoteDomain>>>;

    fn lookup_domain(&self, key: DomainKey<'_>) -> Result<Box<dyn RemoteDomain>>;

    // =========================================================================
    // Secrets
    // =========================================================================

    fn define_secret(&self, xml: &str) -> Result<Box<dyn RemoteSecret>>;

    fn list_secrets(&self, flags: SecretListFlags) -> Result<Vec<Box<dyn RemoteSecret>>>;

    fn lookup_secret(&self, key: SecretKey<'_>) -> Result<Box<dyn RemoteSecret>>;
}

/// Daemon-side reference to a domain. Every query goes to the daemon.
pub trait RemoteDomain: Send + Sync {
    /// Runtime ID, `None` while the domain is not running.
    fn id(&self) -> Result<Option<u32>>;

    fn name(&self) -> Result<String>;

    fn uuid(&self) -> Result<String>;

    fn is_active(&self) -> Result<bool>;

    fn is_persistent(&self) -> Result<bool>;

    fn xml_desc(&self) -> Result<String>;

    fn create(&self, flags: DomainCreateFlags) -> Result<()>;

    fn destroy(&self, flags: DomainDestroyFlags) -> Result<()>;

    fn undefine(&self, flags: DomainUndefineFlags) -> Result<()>;

    /// Release the reference. Does not touch the domain itself.
    fn free(&mut self) -> Result<()>;
}

/// Daemon-side reference to a secret.
pub trait RemoteSecret: Send + Sync {
    fn uuid(&self) -> Result<String>;

    fn usage_type(&self) -> Result<SecretUsageType>;

    fn usage_id(&self) -> Result<String>;

    fn xml_desc(&self) -> Result<String>;

    fn set_value(&self, value: &[u8]) -> Result<()>;

    fn value(&self) -> Result<Vec<u8>>;

    fn undefine(&self) -> Result<()>;

    fn free(&mut self) -> Result<()>;
}
