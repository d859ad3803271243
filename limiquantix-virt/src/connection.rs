//! Connections and the connector that opens them.
//!
//! A [`Connection`] is reference counted explicitly: it starts at 1,
//! [`Connection::add_ref`] adds a holder and every holder calls
//! [`Connection::close`] exactly once. The session is released when the
//! count reaches 0. Cloning a `Connection` value shares the same count and
//! does not add a holder.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::config::{resolve_default_uri, ConnectConfig, DEFAULT_URI_ENV};
use crate::domain::Domain;
use crate::error::{Result, VirtError};
use crate::flags::*;
use crate::lookup::{DomainKey, SecretKey};
use crate::secret::Secret;
use crate::transport::{Driver, Session};
use crate::types::{AccessMode, VersionNumber};

// =============================================================================
// CONNECTOR
// =============================================================================

/// Opens connections through a driver.
#[derive(Clone)]
pub struct Connector {
    driver: Arc<dyn Driver>,
    config: ConnectConfig,
}

impl Connector {
    /// Create a connector for the given driver with default configuration.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            config: ConnectConfig::default(),
        }
    }

    /// Connector backed by the system libvirt library.
    #[cfg(feature = "libvirt")]
    pub fn libvirt() -> Self {
        Self::new(Arc::new(crate::libvirt::LibvirtDriver::new()))
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ConnectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// The URI `open_default` would use right now.
    pub fn default_uri(&self) -> String {
        let env = std::env::var(DEFAULT_URI_ENV).ok();
        resolve_default_uri(
            self.config.default_uri.as_deref(),
            env.as_deref(),
            self.driver.default_uri(),
        )
    }

    /// Open a connection to `uri`.
    #[instrument(skip(self), fields(driver = %self.driver.name()))]
    pub fn open(&self, uri: &str, mode: AccessMode) -> Result<Connection> {
        if uri.is_empty() {
            return Err(VirtError::InvalidUri("URI must not be empty".to_string()));
        }

        info!("Opening connection");

        let session = self.driver.open(uri, mode).map_err(|e| match e {
            VirtError::InvalidUri(_) => e,
            other => VirtError::InvalidUri(format!("{}: {}", uri, other)),
        })?;

        info!("Connection opened");
        Ok(Connection::established(session, uri.to_string(), mode))
    }

    /// Open a read-only connection to `uri`.
    pub fn open_read_only(&self, uri: &str) -> Result<Connection> {
        self.open(uri, AccessMode::ReadOnly)
    }

    /// Open the default URI in the configured mode.
    pub fn open_default(&self) -> Result<Connection> {
        let mode = if self.config.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };
        self.open(&self.default_uri(), mode)
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// State shared by a connection and the handles it produced.
///
/// Handles keep a `Weak` to this; they never keep the session alive.
pub(crate) struct ConnectionShared {
    uri: String,
    mode: AccessMode,
    refs: AtomicU32,
    session: RwLock<Option<Arc<dyn Session>>>,
}

impl ConnectionShared {
    /// Run `f` against the session while holding it open.
    ///
    /// `close` waits for calls in flight before tearing the session down.
    pub(crate) fn while_open<T>(&self, f: impl FnOnce(&dyn Session) -> Result<T>) -> Result<T> {
        let guard = self
            .session
            .read()
            .map_err(|_| VirtError::TransportFailure("session lock poisoned".to_string()))?;

        match guard.as_ref() {
            Some(session) => f(session.as_ref()),
            None => Err(VirtError::connection_closed()),
        }
    }

    pub(crate) fn mode(&self) -> AccessMode {
        self.mode
    }
}

/// An open connection to a hypervisor daemon.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    fn established(session: Arc<dyn Session>, uri: String, mode: AccessMode) -> Self {
        Self {
            shared: Arc::new(ConnectionShared {
                uri,
                mode,
                refs: AtomicU32::new(1),
                session: RwLock::new(Some(session)),
            }),
        }
    }

    /// The URI this connection was opened with.
    pub fn origin_uri(&self) -> &str {
        &self.shared.uri
    }

    pub fn access_mode(&self) -> AccessMode {
        self.shared.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.mode.is_read_only()
    }

    /// Current reference count. Only a snapshot under concurrent use.
    pub fn ref_count(&self) -> u32 {
        self.shared.refs.load(Ordering::Acquire)
    }

    /// True once the count has reached 0 and the session is gone.
    pub fn is_closed(&self) -> bool {
        self.ref_count() == 0
    }

    // =========================================================================
    // Reference counting
    // =========================================================================

    /// Register one more holder. Each holder must call `close` once.
    pub fn add_ref(&self) -> Result<()> {
        let previous = self
            .shared
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    n.checked_add(1)
                }
            })
            .map_err(|n| {
                if n == 0 {
                    VirtError::connection_closed()
                } else {
                    VirtError::InvalidState("reference count overflow".to_string())
                }
            })?;

        debug!(uri = %self.shared.uri, refs = previous + 1, "Connection referenced");
        Ok(())
    }

    /// Drop one holder and return the remaining count.
    ///
    /// At 0 the session is closed. Closing more times than there were
    /// holders fails with `InvalidState`.
    pub fn close(&self) -> Result<u32> {
        let previous = self
            .shared
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| VirtError::InvalidState("connection is already closed".to_string()))?;
        let remaining = previous - 1;

        if remaining > 0 {
            debug!(uri = %self.shared.uri, refs = remaining, "Connection released");
            return Ok(remaining);
        }

        let session = self
            .shared
            .session
            .write()
            .map_err(|_| VirtError::TransportFailure("session lock poisoned".to_string()))?
            .take();

        if let Some(session) = session {
            if let Err(e) = session.close() {
                warn!(uri = %self.shared.uri, error = %e, "Session close failed");
                return Err(e);
            }
        }

        info!(uri = %self.shared.uri, "Connection closed");
        Ok(0)
    }

    // =========================================================================
    // Session health
    // =========================================================================

    pub fn is_alive(&self) -> Result<bool> {
        self.shared.while_open(|s| s.is_alive())
    }

    pub fn is_encrypted(&self) -> Result<bool> {
        self.shared.while_open(|s| s.is_encrypted())
    }

    pub fn is_secure(&self) -> Result<bool> {
        self.shared.while_open(|s| s.is_secure())
    }

    // =========================================================================
    // Host metadata
    // =========================================================================

    /// Version of the hypervisor behind the daemon.
    pub fn version(&self) -> Result<VersionNumber> {
        self.shared
            .while_open(|s| s.hypervisor_version())
            .map(VersionNumber::from_raw)
    }

    /// Version of the client library serving this connection.
    pub fn lib_version(&self) -> Result<VersionNumber> {
        self.shared
            .while_open(|s| s.library_version())
            .map(VersionNumber::from_raw)
    }

    /// Capabilities document of the host.
    pub fn capabilities(&self) -> Result<String> {
        self.shared.while_open(|s| s.capabilities())
    }

    pub fn hostname(&self) -> Result<String> {
        self.shared.while_open(|s| s.hostname())
    }

    /// Host SMBIOS data. Per-user session scopes answer `Unsupported`.
    pub fn sysinfo(&self) -> Result<String> {
        self.shared.while_open(|s| s.sysinfo())
    }

    /// Name of the hypervisor driver (e.g., "QEMU").
    pub fn hypervisor_type(&self) -> Result<String> {
        self.shared.while_open(|s| s.hypervisor_type())
    }

    /// Canonical URI as reported by the daemon.
    pub fn uri(&self) -> Result<String> {
        self.shared.while_open(|s| s.uri())
    }

    /// CPU models the host can expose for `arch`.
    pub fn cpu_model_names(&self, arch: &str) -> Result<Vec<String>> {
        if arch.is_empty() {
            return Err(VirtError::InvalidArgument("architecture must not be empty".to_string()));
        }
        self.shared.while_open(|s| s.cpu_model_names(arch))
    }

    /// Maximum vCPUs per guest for a virtualization type such as "kvm".
    pub fn max_vcpus(&self, kind: &str) -> Result<u32> {
        if kind.is_empty() {
            return Err(VirtError::InvalidArgument("virtualization type must not be empty".to_string()));
        }
        self.shared.while_open(|s| s.max_vcpus(kind))
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// Store a persistent definition. The domain starts inactive.
    #[instrument(skip(self, xml), fields(uri = %self.shared.uri))]
    pub fn define_domain(&self, xml: &str) -> Result<Domain> {
        self.check_mutation("define domain")?;
        check_descriptor(xml, "domain")?;

        let remote = self.shared.while_open(|s| s.define_domain(xml))?;
        let domain = Domain::new(remote, &self.shared);
        info!("Domain defined");
        Ok(domain)
    }

    /// Launch a transient domain straight from a descriptor.
    #[instrument(skip(self, xml, flags), fields(uri = %self.shared.uri, flags = %flags))]
    pub fn create_domain(&self, xml: &str, flags: DomainCreateFlags) -> Result<Domain> {
        self.check_mutation("create domain")?;
        check_descriptor(xml, "domain")?;

        let remote = self.shared.while_open(|s| s.create_domain(xml, flags))?;
        let domain = Domain::new(remote, &self.shared);
        info!("Domain created");
        Ok(domain)
    }

    /// List domains matching `flags`. Each returned handle must be freed.
    pub fn list_domains(&self, flags: DomainListFlags) -> Result<Vec<Domain>> {
        let remotes = self.shared.while_open(|s| s.list_domains(flags))?;
        debug!(count = remotes.len(), flags = %flags, "Listed domains");
        Ok(remotes
            .into_iter()
            .map(|remote| Domain::new(remote, &self.shared))
            .collect())
    }

    /// Resolve a domain from any of its keys.
    pub fn lookup_domain(&self, key: DomainKey<'_>) -> Result<Domain> {
        key.validate()?;
        let remote = self.shared.while_open(|s| s.lookup_domain(key))?;
        debug!(key = %key, "Domain found");
        Ok(Domain::new(remote, &self.shared))
    }

    pub fn lookup_domain_by_id(&self, id: u32) -> Result<Domain> {
        self.lookup_domain(DomainKey::Id(id))
    }

    pub fn lookup_domain_by_name(&self, name: &str) -> Result<Domain> {
        self.lookup_domain(DomainKey::Name(name))
    }

    /// Look up a domain by UUID.
    ///
    /// The daemon accepts any letter case, so `6F9619FF-...` finds the same
    /// domain as `6f9619ff-...`. [`Domain::uuid`] always reports the daemon's
    /// canonical lowercase form, not the string passed in here.
    pub fn lookup_domain_by_uuid(&self, uuid: &str) -> Result<Domain> {
        self.lookup_domain(DomainKey::Uuid(uuid))
    }

    // =========================================================================
    // Secrets
    // =========================================================================

    /// Define a secret, or update the one with the same UUID.
    #[instrument(skip(self, xml), fields(uri = %self.shared.uri))]
    pub fn define_secret(&self, xml: &str) -> Result<Secret> {
        self.check_mutation("define secret")?;
        check_descriptor(xml, "secret")?;

        let remote = self.shared.while_open(|s| s.define_secret(xml))?;
        let secret = Secret::new(remote, &self.shared);
        info!("Secret defined");
        Ok(secret)
    }

    /// List secrets matching `flags`. Each returned handle must be freed.
    pub fn list_secrets(&self, flags: SecretListFlags) -> Result<Vec<Secret>> {
        let remotes = self.shared.while_open(|s| s.list_secrets(flags))?;
        debug!(count = remotes.len(), flags = %flags, "Listed secrets");
        Ok(remotes
            .into_iter()
            .map(|remote| Secret::new(remote, &self.shared))
            .collect())
    }

    /// Resolve a secret from its UUID or its usage pair.
    pub fn lookup_secret(&self, key: SecretKey<'_>) -> Result<Secret> {
        key.validate()?;
        let remote = self.shared.while_open(|s| s.lookup_secret(key))?;
        debug!(key = %key, "Secret found");
        Ok(Secret::new(remote, &self.shared))
    }

    pub fn lookup_secret_by_uuid(&self, uuid: &str) -> Result<Secret> {
        self.lookup_secret(SecretKey::Uuid(uuid))
    }

    pub fn lookup_secret_by_usage(&self, usage_type: SecretUsageType, usage_id: &str) -> Result<Secret> {
        self.lookup_secret(SecretKey::Usage(usage_type, usage_id))
    }

    fn check_mutation(&self, op: &str) -> Result<()> {
        if self.shared.mode.is_read_only() {
            return Err(VirtError::read_only(op));
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.shared.uri)
            .field("mode", &self.shared.mode)
            .field("refs", &self.ref_count())
            .finish()
    }
}

fn check_descriptor(xml: &str, what: &str) -> Result<()> {
    if xml.trim().is_empty() {
        return Err(VirtError::InvalidArgument(format!("{} descriptor must not be empty", what)));
    }
    Ok(())
}
