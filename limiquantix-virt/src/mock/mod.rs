//! In-memory hypervisor daemon for testing and development.
//!
//! [`MockDriver`] behaves like a small libvirt daemon: every session opened
//! from the same driver sees the same domains and secrets, descriptors are
//! parsed, flags are checked against the daemon's allowlist and lifecycle
//! rules are enforced daemon-side. Useful for:
//! - Unit and integration testing
//! - Development without libvirt installed
//! - `limiquantix-virtctl --dev`

mod descriptor;
mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{Result, VirtError};
use crate::flags::*;
use crate::lookup::{DomainKey, SecretKey};
use crate::transport::{Driver, RemoteDomain, RemoteSecret, Session};
use crate::types::{AccessMode, VersionNumber};

use descriptor::{normalize_uuid, DomainSpec, SecretSpec};
use state::DaemonState;

/// URI the mock driver opens by default.
pub const MOCK_DEFAULT_URI: &str = "test:///default";

/// Library version reported by mock sessions.
const LIBRARY_VERSION: VersionNumber = VersionNumber::new(10, 0, 0);

/// QEMU version reported by `qemu://` sessions.
const QEMU_VERSION: VersionNumber = VersionNumber::new(8, 2, 0);

/// Host UUID reported in capabilities and sysinfo.
const HOST_UUID: &str = "6f8e2c1a-3b4d-4e5f-8a9b-0c1d2e3f4a5b";

// =============================================================================
// URI
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UriDriver {
    Test,
    Qemu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Default,
    System,
    Session,
}

#[derive(Debug, Clone)]
struct MockUri {
    raw: String,
    driver: UriDriver,
    transport: Option<String>,
    host: Option<String>,
    scope: Scope,
}

impl MockUri {
    /// Accepts `test:///default` and `qemu[+transport]://[host]/{system,session}`.
    fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| VirtError::InvalidUri(format!("{}: {}", uri, reason));

        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;

        let (driver, transport) = match url.scheme().split_once('+') {
            Some((driver, transport)) => (driver, Some(transport)),
            None => (url.scheme(), None),
        };

        let driver = match driver {
            "test" => UriDriver::Test,
            "qemu" => UriDriver::Qemu,
            other => return Err(invalid(&format!("no connection driver available for '{}'", other))),
        };

        if let Some(transport) = transport {
            if !matches!(transport, "unix" | "ssh" | "tcp" | "tls") {
                return Err(invalid(&format!("unsupported transport '{}'", transport)));
            }
        }

        let scope = match (driver, url.path()) {
            (UriDriver::Test, "/default") => Scope::Default,
            (UriDriver::Qemu, "/system") => Scope::System,
            (UriDriver::Qemu, "/session") => Scope::Session,
            (_, path) => return Err(invalid(&format!("unexpected path '{}'", path))),
        };

        // IPv6 literals come back bracketed.
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        Ok(Self {
            raw: uri.to_string(),
            driver,
            transport: transport.map(str::to_string),
            host,
            scope,
        })
    }

    /// Host name without user, port or brackets.
    fn host_name(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn is_encrypted(&self) -> bool {
        matches!(self.transport.as_deref(), Some("ssh") | Some("tls"))
    }

    fn is_secure(&self) -> bool {
        self.is_encrypted() || self.host.is_none()
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct MockDaemon {
    state: RwLock<DaemonState>,
    next_session: AtomicU64,
    open_sessions: AtomicUsize,
    hostname: String,
}

impl MockDaemon {
    fn read(&self) -> Result<RwLockReadGuard<'_, DaemonState>> {
        self.state
            .read()
            .map_err(|_| VirtError::TransportFailure("daemon state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DaemonState>> {
        self.state
            .write()
            .map_err(|_| VirtError::TransportFailure("daemon state lock poisoned".to_string()))
    }
}

/// In-memory hypervisor driver.
///
/// Clones share the same daemon.
#[derive(Clone)]
pub struct MockDriver {
    daemon: Arc<MockDaemon>,
}

impl MockDriver {
    /// Create a driver with an empty daemon.
    pub fn new() -> Self {
        info!("Creating mock hypervisor driver");

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            daemon: Arc::new(MockDaemon {
                state: RwLock::new(DaemonState::default()),
                next_session: AtomicU64::new(1),
                open_sessions: AtomicUsize::new(0),
                hostname,
            }),
        }
    }

    /// Sessions currently open against the daemon.
    pub fn open_sessions(&self) -> usize {
        self.daemon.open_sessions.load(Ordering::Acquire)
    }

    /// Domains known to the daemon, active or defined.
    pub fn domain_count(&self) -> Result<usize> {
        Ok(self.daemon.read()?.domain_count())
    }

    /// Secrets known to the daemon.
    pub fn secret_count(&self) -> Result<usize> {
        Ok(self.daemon.read()?.secret_count())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_uri(&self) -> &str {
        MOCK_DEFAULT_URI
    }

    #[instrument(skip(self))]
    fn open(&self, uri: &str, mode: AccessMode) -> Result<Arc<dyn Session>> {
        let uri = MockUri::parse(uri)?;
        let id = self.daemon.next_session.fetch_add(1, Ordering::Relaxed);
        self.daemon.open_sessions.fetch_add(1, Ordering::AcqRel);

        debug!(session = id, "Mock session opened");

        Ok(Arc::new(MockSession {
            core: Arc::new(SessionCore {
                daemon: Arc::clone(&self.daemon),
                id,
                mode,
                closed: AtomicBool::new(false),
            }),
            uri,
        }))
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Session bookkeeping shared with the handles it produced.
struct SessionCore {
    daemon: Arc<MockDaemon>,
    id: u64,
    mode: AccessMode,
    closed: AtomicBool,
}

impl SessionCore {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VirtError::InvalidState("invalid connection pointer".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DaemonState>> {
        self.check_open()?;
        self.daemon.read()
    }

    /// Write access to the daemon state, refused on read-only sessions.
    fn write(&self) -> Result<RwLockWriteGuard<'_, DaemonState>> {
        self.check_open()?;
        if self.mode.is_read_only() {
            return Err(VirtError::PermissionDenied(
                "operation forbidden for read only access".to_string(),
            ));
        }
        self.daemon.write()
    }

    fn domain(self: &Arc<Self>, uuid: String) -> Box<dyn RemoteDomain> {
        Box::new(MockDomain {
            core: Arc::clone(self),
            uuid,
            freed: false,
        })
    }

    fn secret(self: &Arc<Self>, uuid: String) -> Box<dyn RemoteSecret> {
        Box::new(MockSecret {
            core: Arc::clone(self),
            uuid,
            freed: false,
        })
    }
}

struct MockSession {
    core: Arc<SessionCore>,
    uri: MockUri,
}

impl Session for MockSession {
    fn close(&self) -> Result<()> {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return Err(VirtError::InvalidState("session is already closed".to_string()));
        }

        let stopped = self.core.daemon.write()?.release_session(self.core.id);
        self.core.daemon.open_sessions.fetch_sub(1, Ordering::AcqRel);

        debug!(session = self.core.id, autodestroyed = stopped, "Mock session closed");
        Ok(())
    }

    fn is_alive(&self) -> Result<bool> {
        Ok(!self.core.closed.load(Ordering::Acquire))
    }

    fn is_encrypted(&self) -> Result<bool> {
        self.core.check_open()?;
        Ok(self.uri.is_encrypted())
    }

    fn is_secure(&self) -> Result<bool> {
        self.core.check_open()?;
        Ok(self.uri.is_secure())
    }

    fn hypervisor_version(&self) -> Result<u64> {
        self.core.check_open()?;
        Ok(match self.uri.driver {
            UriDriver::Test => LIBRARY_VERSION.raw(),
            UriDriver::Qemu => QEMU_VERSION.raw(),
        })
    }

    fn library_version(&self) -> Result<u64> {
        self.core.check_open()?;
        Ok(LIBRARY_VERSION.raw())
    }

    fn capabilities(&self) -> Result<String> {
        self.core.check_open()?;
        let arch = std::env::consts::ARCH;
        Ok(format!(
            "<capabilities>\n  <host>\n    <uuid>{}</uuid>\n    <cpu>\n      <arch>{}</arch>\n    </cpu>\n  </host>\n  <guest>\n    <os_type>hvm</os_type>\n    <arch name='{}'>\n      <domain type='{}'/>\n    </arch>\n  </guest>\n</capabilities>\n",
            HOST_UUID,
            arch,
            arch,
            match self.uri.driver {
                UriDriver::Test => "test",
                UriDriver::Qemu => "kvm",
            }
        ))
    }

    fn hostname(&self) -> Result<String> {
        self.core.check_open()?;
        Ok(self
            .uri
            .host_name()
            .unwrap_or(&self.core.daemon.hostname)
            .to_string())
    }

    fn sysinfo(&self) -> Result<String> {
        self.core.check_open()?;
        if self.uri.scope == Scope::Session {
            return Err(VirtError::Unsupported(
                "host sysinfo is not available for per-user sessions".to_string(),
            ));
        }
        Ok(format!(
            "<sysinfo type='smbios'>\n  <system>\n    <entry name='manufacturer'>limiquantix</entry>\n    <entry name='uuid'>{}</entry>\n  </system>\n</sysinfo>\n",
            HOST_UUID
        ))
    }

    fn hypervisor_type(&self) -> Result<String> {
        self.core.check_open()?;
        Ok(match self.uri.driver {
            UriDriver::Test => "TEST",
            UriDriver::Qemu => "QEMU",
        }
        .to_string())
    }

    fn uri(&self) -> Result<String> {
        self.core.check_open()?;
        Ok(self.uri.raw.clone())
    }

    fn cpu_model_names(&self, arch: &str) -> Result<Vec<String>> {
        self.core.check_open()?;
        let models: &[&str] = match arch {
            "x86_64" => &[
                "486", "pentium", "qemu64", "kvm64", "Nehalem", "SandyBridge", "Haswell",
                "Skylake-Client", "Skylake-Server", "EPYC",
            ],
            "i686" => &["486", "pentium", "pentium2", "pentium3", "qemu32", "kvm32"],
            "aarch64" => &["cortex-a53", "cortex-a57", "cortex-a72", "neoverse-n1", "max"],
            "ppc64le" => &["POWER8", "POWER9", "POWER10"],
            "s390x" => &["z13", "z14", "z15", "gen16a"],
            _ => {
                return Err(VirtError::InvalidArgument(format!(
                    "cannot find architecture {}",
                    arch
                )))
            }
        };
        Ok(models.iter().map(|m| m.to_string()).collect())
    }

    fn max_vcpus(&self, kind: &str) -> Result<u32> {
        self.core.check_open()?;
        match (self.uri.driver, kind.to_ascii_lowercase().as_str()) {
            (UriDriver::Test, "test") => Ok(32),
            (UriDriver::Test, "kvm") | (UriDriver::Qemu, "kvm") => Ok(4096),
            (UriDriver::Test, "qemu") | (UriDriver::Qemu, "qemu") => Ok(1024),
            _ => Err(VirtError::InvalidArgument(format!(
                "unknown virtualization type '{}'",
                kind
            ))),
        }
    }

    fn define_domain(&self, xml: &str) -> Result<Box<dyn RemoteDomain>> {
        let spec = DomainSpec::parse(xml)?;
        let uuid = self.core.write()?.define_domain(spec, xml)?;
        debug!(uuid = %uuid, "Mock domain defined");
        Ok(self.core.domain(uuid))
    }

    fn create_domain(&self, xml: &str, flags: DomainCreateFlags) -> Result<Box<dyn RemoteDomain>> {
        let spec = DomainSpec::parse(xml)?;
        let uuid = self
            .core
            .write()?
            .create_domain(spec, xml, flags, self.core.id)?;
        debug!(uuid = %uuid, "Mock domain created");
        Ok(self.core.domain(uuid))
    }

    fn list_domains(&self, flags: DomainListFlags) -> Result<Vec<Box<dyn RemoteDomain>>> {
        let uuids = self.core.read()?.list_domains(flags)?;
        Ok(uuids.into_iter().map(|uuid| self.core.domain(uuid)).collect())
    }

    fn lookup_domain(&self, key: DomainKey<'_>) -> Result<Box<dyn RemoteDomain>> {
        let state = self.core.read()?;
        let found = match key {
            DomainKey::Id(id) => state.domain_by_id(id),
            DomainKey::Name(name) => state.domain_by_name(name),
            DomainKey::Uuid(uuid) => normalize_uuid(uuid).and_then(|uuid| state.domain(&uuid).ok()),
        };

        let uuid = found
            .map(|d| d.uuid.clone())
            .ok_or_else(|| VirtError::NotFound(format!("no domain with matching {}", key)))?;
        drop(state);

        Ok(self.core.domain(uuid))
    }

    fn define_secret(&self, xml: &str) -> Result<Box<dyn RemoteSecret>> {
        let spec = SecretSpec::parse(xml)?;
        let uuid = self.core.write()?.define_secret(spec, xml)?;
        debug!(uuid = %uuid, "Mock secret defined");
        Ok(self.core.secret(uuid))
    }

    fn list_secrets(&self, flags: SecretListFlags) -> Result<Vec<Box<dyn RemoteSecret>>> {
        let uuids = self.core.read()?.list_secrets(flags)?;
        Ok(uuids.into_iter().map(|uuid| self.core.secret(uuid)).collect())
    }

    fn lookup_secret(&self, key: SecretKey<'_>) -> Result<Box<dyn RemoteSecret>> {
        let state = self.core.read()?;
        let uuid = match key {
            SecretKey::Uuid(uuid) => normalize_uuid(uuid)
                .and_then(|uuid| state.secret(&uuid).ok())
                .map(|s| s.uuid.clone())
                .ok_or_else(|| VirtError::NotFound(format!("no secret with matching {}", key)))?,
            SecretKey::Usage(usage_type, usage_id) => {
                state.secret_by_usage(usage_type, usage_id)?.uuid.clone()
            }
        };
        drop(state);

        Ok(self.core.secret(uuid))
    }
}

// =============================================================================
// HANDLES
// =============================================================================

struct MockDomain {
    core: Arc<SessionCore>,
    uuid: String,
    freed: bool,
}

impl MockDomain {
    fn check_live(&self) -> Result<()> {
        if self.freed {
            return Err(VirtError::InvalidState("domain reference has been freed".to_string()));
        }
        Ok(())
    }
}

impl RemoteDomain for MockDomain {
    fn id(&self) -> Result<Option<u32>> {
        self.check_live()?;
        Ok(self.core.read()?.domain(&self.uuid)?.id)
    }

    fn name(&self) -> Result<String> {
        self.check_live()?;
        Ok(self.core.read()?.domain(&self.uuid)?.name.clone())
    }

    fn uuid(&self) -> Result<String> {
        self.check_live()?;
        Ok(self.uuid.clone())
    }

    fn is_active(&self) -> Result<bool> {
        self.check_live()?;
        Ok(self.core.read()?.domain(&self.uuid)?.is_active())
    }

    fn is_persistent(&self) -> Result<bool> {
        self.check_live()?;
        Ok(self.core.read()?.domain(&self.uuid)?.persistent)
    }

    fn xml_desc(&self) -> Result<String> {
        self.check_live()?;
        Ok(self.core.read()?.domain(&self.uuid)?.xml.clone())
    }

    fn create(&self, flags: DomainCreateFlags) -> Result<()> {
        self.check_live()?;
        self.core.write()?.start_domain(&self.uuid, flags, self.core.id)
    }

    fn destroy(&self, flags: DomainDestroyFlags) -> Result<()> {
        self.check_live()?;
        self.core.write()?.destroy_domain(&self.uuid, flags)
    }

    fn undefine(&self, flags: DomainUndefineFlags) -> Result<()> {
        self.check_live()?;
        self.core.write()?.undefine_domain(&self.uuid, flags)
    }

    fn free(&mut self) -> Result<()> {
        self.check_live()?;
        self.freed = true;
        Ok(())
    }
}

struct MockSecret {
    core: Arc<SessionCore>,
    uuid: String,
    freed: bool,
}

impl MockSecret {
    fn check_live(&self) -> Result<()> {
        if self.freed {
            return Err(VirtError::InvalidState("secret reference has been freed".to_string()));
        }
        Ok(())
    }
}

impl RemoteSecret for MockSecret {
    fn uuid(&self) -> Result<String> {
        self.check_live()?;
        Ok(self.uuid.clone())
    }

    fn usage_type(&self) -> Result<SecretUsageType> {
        self.check_live()?;
        Ok(self.core.read()?.secret(&self.uuid)?.usage_type)
    }

    fn usage_id(&self) -> Result<String> {
        self.check_live()?;
        Ok(self.core.read()?.secret(&self.uuid)?.usage_id.clone())
    }

    fn xml_desc(&self) -> Result<String> {
        self.check_live()?;
        Ok(self.core.read()?.secret(&self.uuid)?.xml.clone())
    }

    fn set_value(&self, value: &[u8]) -> Result<()> {
        self.check_live()?;
        self.core.write()?.secret_mut(&self.uuid)?.value = Some(value.to_vec());
        Ok(())
    }

    fn value(&self) -> Result<Vec<u8>> {
        self.check_live()?;
        if self.core.mode.is_read_only() {
            return Err(VirtError::PermissionDenied(
                "secret values cannot be read over a read-only connection".to_string(),
            ));
        }

        let state = self.core.read()?;
        let secret = state.secret(&self.uuid)?;
        if secret.private {
            return Err(VirtError::PermissionDenied(format!(
                "secret '{}' is private",
                secret.uuid
            )));
        }
        secret
            .value
            .clone()
            .ok_or_else(|| VirtError::NotFound(format!("secret '{}' has no value", secret.uuid)))
    }

    fn undefine(&self) -> Result<()> {
        self.check_live()?;
        self.core.write()?.undefine_secret(&self.uuid)
    }

    fn free(&mut self) -> Result<()> {
        self.check_live()?;
        self.freed = true;
        Ok(())
    }
}
