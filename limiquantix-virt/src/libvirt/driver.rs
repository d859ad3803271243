//! Libvirt driver implementation.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::{Error as LibvirtError, ErrorNumber};
use virt::secret::Secret;

use crate::error::{Result, VirtError};
use crate::flags::*;
use crate::lookup::{DomainKey, SecretKey};
use crate::transport::{Driver, RemoteDomain, RemoteSecret, Session};
use crate::types::AccessMode;

/// URI used when nothing else names one.
const LIBVIRT_DEFAULT_URI: &str = "qemu:///system";

/// Map a libvirt error onto the crate's classification.
fn classify(e: LibvirtError) -> VirtError {
    let message = e.message().to_string();
    match e.code() {
        ErrorNumber::NoDomain | ErrorNumber::NoSecret => VirtError::NotFound(message),
        ErrorNumber::InvalidArg | ErrorNumber::XmlError | ErrorNumber::XmlDetail => {
            VirtError::InvalidArgument(message)
        }
        ErrorNumber::OperationDenied | ErrorNumber::AuthFailed | ErrorNumber::AccessDenied => {
            VirtError::PermissionDenied(message)
        }
        ErrorNumber::NoSupport | ErrorNumber::OperationUnsupported => VirtError::Unsupported(message),
        ErrorNumber::OperationInvalid | ErrorNumber::InvalidDomain | ErrorNumber::InvalidSecret => {
            VirtError::InvalidState(message)
        }
        ErrorNumber::InvalidConn => VirtError::InvalidState(message),
        _ => VirtError::TransportFailure(message),
    }
}

fn poisoned() -> VirtError {
    VirtError::TransportFailure("libvirt handle lock poisoned".to_string())
}

/// Driver backed by the system libvirt library.
#[derive(Debug, Default, Clone)]
pub struct LibvirtDriver;

impl LibvirtDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for LibvirtDriver {
    fn name(&self) -> &str {
        "libvirt"
    }

    fn default_uri(&self) -> &str {
        LIBVIRT_DEFAULT_URI
    }

    #[instrument(skip(self))]
    fn open(&self, uri: &str, mode: AccessMode) -> Result<Arc<dyn Session>> {
        info!("Connecting to libvirt");

        let conn = match mode {
            AccessMode::ReadWrite => Connect::open(Some(uri)),
            AccessMode::ReadOnly => Connect::open_read_only(Some(uri)),
        }
        .map_err(|e| VirtError::InvalidUri(format!("{}: {}", uri, e)))?;

        info!("Connected to libvirt");
        Ok(Arc::new(LibvirtSession {
            conn: Mutex::new(Some(conn)),
        }))
    }
}

struct LibvirtSession {
    conn: Mutex<Option<Connect>>,
}

impl LibvirtSession {
    fn with_conn<T>(&self, f: impl FnOnce(&Connect) -> std::result::Result<T, LibvirtError>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| poisoned())?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| VirtError::InvalidState("libvirt connection is closed".to_string()))?;
        f(conn).map_err(classify)
    }

    fn domain(domain: Domain) -> Box<dyn RemoteDomain> {
        Box::new(LibvirtDomain {
            inner: Mutex::new(domain),
        })
    }

    fn secret(secret: Secret) -> Box<dyn RemoteSecret> {
        Box::new(LibvirtSecret {
            inner: Mutex::new(secret),
        })
    }
}

impl Session for LibvirtSession {
    fn close(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| poisoned())?.take();
        if let Some(mut conn) = conn {
            let remaining = conn.close().map_err(classify)?;
            if remaining > 0 {
                warn!(remaining, "Libvirt connection still referenced after close");
            }
        }
        Ok(())
    }

    fn is_alive(&self) -> Result<bool> {
        self.with_conn(|c| c.is_alive())
    }

    fn is_encrypted(&self) -> Result<bool> {
        self.with_conn(|c| c.is_encrypted())
    }

    fn is_secure(&self) -> Result<bool> {
        self.with_conn(|c| c.is_secure())
    }

    fn hypervisor_version(&self) -> Result<u64> {
        self.with_conn(|c| c.get_hyp_version()).map(u64::from)
    }

    fn library_version(&self) -> Result<u64> {
        self.with_conn(|c| c.get_lib_version()).map(u64::from)
    }

    fn capabilities(&self) -> Result<String> {
        self.with_conn(|c| c.get_capabilities())
    }

    fn hostname(&self) -> Result<String> {
        self.with_conn(|c| c.get_hostname())
    }

    fn sysinfo(&self) -> Result<String> {
        self.with_conn(|c| c.get_sys_info(0))
    }

    fn hypervisor_type(&self) -> Result<String> {
        self.with_conn(|c| c.get_type())
    }

    fn uri(&self) -> Result<String> {
        self.with_conn(|c| c.get_uri())
    }

    fn cpu_model_names(&self, arch: &str) -> Result<Vec<String>> {
        self.with_conn(|c| c.get_cpu_models_names(arch, 0))
    }

    fn max_vcpus(&self, kind: &str) -> Result<u32> {
        self.with_conn(|c| c.get_max_vcpus(kind))
    }

    fn define_domain(&self, xml: &str) -> Result<Box<dyn RemoteDomain>> {
        let domain = self.with_conn(|c| Domain::define_xml(c, xml))?;
        debug!("Domain defined in libvirt");
        Ok(Self::domain(domain))
    }

    fn create_domain(&self, xml: &str, flags: DomainCreateFlags) -> Result<Box<dyn RemoteDomain>> {
        let domain = self.with_conn(|c| Domain::create_xml(c, xml, flags.bits()))?;
        debug!("Domain created in libvirt");
        Ok(Self::domain(domain))
    }

    fn list_domains(&self, flags: DomainListFlags) -> Result<Vec<Box<dyn RemoteDomain>>> {
        let domains = self.with_conn(|c| c.list_all_domains(flags.bits()))?;
        Ok(domains.into_iter().map(Self::domain).collect())
    }

    fn lookup_domain(&self, key: DomainKey<'_>) -> Result<Box<dyn RemoteDomain>> {
        let domain = self.with_conn(|c| match key {
            DomainKey::Id(id) => Domain::lookup_by_id(c, id),
            DomainKey::Name(name) => Domain::lookup_by_name(c, name),
            DomainKey::Uuid(uuid) => Domain::lookup_by_uuid_string(c, uuid),
        })?;
        Ok(Self::domain(domain))
    }

    fn define_secret(&self, xml: &str) -> Result<Box<dyn RemoteSecret>> {
        let secret = self.with_conn(|c| Secret::define_xml(c, xml, 0))?;
        debug!("Secret defined in libvirt");
        Ok(Self::secret(secret))
    }

    fn list_secrets(&self, flags: SecretListFlags) -> Result<Vec<Box<dyn RemoteSecret>>> {
        let secrets = self.with_conn(|c| c.list_all_secrets(flags.bits()))?;
        Ok(secrets.into_iter().map(Self::secret).collect())
    }

    fn lookup_secret(&self, key: SecretKey<'_>) -> Result<Box<dyn RemoteSecret>> {
        let secret = match key {
            SecretKey::Uuid(uuid) => self.with_conn(|c| Secret::lookup_by_uuid_string(c, uuid))?,
            SecretKey::Usage(usage_type, usage_id) => {
                let usage_type = usage_type.to_c_int()?;
                self.with_conn(|c| Secret::lookup_by_usage(c, usage_type, usage_id))?
            }
        };
        Ok(Self::secret(secret))
    }
}

struct LibvirtDomain {
    inner: Mutex<Domain>,
}

impl LibvirtDomain {
    fn lock(&self) -> Result<MutexGuard<'_, Domain>> {
        self.inner.lock().map_err(|_| poisoned())
    }
}

impl RemoteDomain for LibvirtDomain {
    fn id(&self) -> Result<Option<u32>> {
        Ok(self.lock()?.get_id())
    }

    fn name(&self) -> Result<String> {
        self.lock()?.get_name().map_err(classify)
    }

    fn uuid(&self) -> Result<String> {
        self.lock()?.get_uuid_string().map_err(classify)
    }

    fn is_active(&self) -> Result<bool> {
        self.lock()?.is_active().map_err(classify)
    }

    fn is_persistent(&self) -> Result<bool> {
        self.lock()?.is_persistent().map_err(classify)
    }

    fn xml_desc(&self) -> Result<String> {
        self.lock()?.get_xml_desc(0).map_err(classify)
    }

    fn create(&self, flags: DomainCreateFlags) -> Result<()> {
        self.lock()?
            .create_with_flags(flags.bits())
            .map(|_| ())
            .map_err(classify)
    }

    fn destroy(&self, flags: DomainDestroyFlags) -> Result<()> {
        self.lock()?
            .destroy_flags(flags.bits())
            .map(|_| ())
            .map_err(classify)
    }

    fn undefine(&self, flags: DomainUndefineFlags) -> Result<()> {
        self.lock()?.undefine_flags(flags.bits()).map_err(classify)
    }

    fn free(&mut self) -> Result<()> {
        self.inner
            .get_mut()
            .map_err(|_| poisoned())?
            .free()
            .map_err(classify)
    }
}

struct LibvirtSecret {
    inner: Mutex<Secret>,
}

impl LibvirtSecret {
    fn lock(&self) -> Result<MutexGuard<'_, Secret>> {
        self.inner.lock().map_err(|_| poisoned())
    }
}

impl RemoteSecret for LibvirtSecret {
    fn uuid(&self) -> Result<String> {
        self.lock()?.get_uuid_string().map_err(classify)
    }

    fn usage_type(&self) -> Result<SecretUsageType> {
        let raw = self.lock()?.get_usage_type().map_err(classify)?;
        Ok(SecretUsageType::from_raw(raw))
    }

    fn usage_id(&self) -> Result<String> {
        self.lock()?.get_usage_id().map_err(classify)
    }

    fn xml_desc(&self) -> Result<String> {
        self.lock()?.get_xml_desc(0).map_err(classify)
    }

    fn set_value(&self, value: &[u8]) -> Result<()> {
        self.lock()?.set_value(value, 0).map_err(classify)
    }

    fn value(&self) -> Result<Vec<u8>> {
        self.lock()?.get_value(0).map_err(classify)
    }

    fn undefine(&self) -> Result<()> {
        self.lock()?.undefine().map_err(classify)
    }

    fn free(&mut self) -> Result<()> {
        self.inner
            .get_mut()
            .map_err(|_| poisoned())?
            .free()
            .map_err(classify)
    }
}
