//! Domain handles.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, info, instrument};

use crate::connection::ConnectionShared;
use crate::error::{Result, VirtError};
use crate::flags::{DomainCreateFlags, DomainDestroyFlags, DomainUndefineFlags};
use crate::transport::RemoteDomain;
use crate::types::AccessMode;

/// Handle to a domain on the daemon.
///
/// The handle does not keep its connection open. Once the connection's last
/// reference is closed every call fails with `InvalidState`. State queries
/// always reach the daemon, so they reflect changes made by other clients.
///
/// Dropping the handle frees it; [`Domain::free`] does the same explicitly
/// and reports failures.
pub struct Domain {
    remote: Option<Box<dyn RemoteDomain>>,
    conn: Weak<ConnectionShared>,
    mode: AccessMode,
}

impl Domain {
    pub(crate) fn new(remote: Box<dyn RemoteDomain>, conn: &Arc<ConnectionShared>) -> Self {
        Self {
            remote: Some(remote),
            conn: Arc::downgrade(conn),
            mode: conn.mode(),
        }
    }

    /// Run `f` against the remote domain while the connection is open.
    fn call<T>(&self, f: impl FnOnce(&dyn RemoteDomain) -> Result<T>) -> Result<T> {
        let remote = self
            .remote
            .as_deref()
            .ok_or_else(|| VirtError::InvalidState("domain handle has been freed".to_string()))?;
        let conn = self.conn.upgrade().ok_or_else(VirtError::connection_closed)?;
        conn.while_open(|_| f(remote))
    }

    fn check_mutation(&self, op: &str) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(VirtError::read_only(op));
        }
        Ok(())
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Runtime ID, `None` while the domain is inactive.
    ///
    /// IDs are reassigned on every start; use [`Domain::uuid`] to identify
    /// a domain durably.
    pub fn id(&self) -> Result<Option<u32>> {
        self.call(|d| d.id())
    }

    pub fn name(&self) -> Result<String> {
        self.call(|d| d.name())
    }

    pub fn uuid(&self) -> Result<String> {
        self.call(|d| d.uuid())
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn is_active(&self) -> Result<bool> {
        self.call(|d| d.is_active())
    }

    pub fn is_persistent(&self) -> Result<bool> {
        self.call(|d| d.is_persistent())
    }

    /// Current descriptor as the daemon sees it.
    pub fn xml_desc(&self) -> Result<String> {
        self.call(|d| d.xml_desc())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a defined domain.
    #[instrument(skip(self, flags), fields(flags = %flags))]
    pub fn create(&self, flags: DomainCreateFlags) -> Result<()> {
        self.check_mutation("start domain")?;
        self.call(|d| d.create(flags))?;
        info!("Domain started");
        Ok(())
    }

    /// Power off a running domain. A persistent definition is kept.
    #[instrument(skip(self, flags), fields(flags = %flags))]
    pub fn destroy(&self, flags: DomainDestroyFlags) -> Result<()> {
        self.check_mutation("destroy domain")?;
        self.call(|d| d.destroy(flags))?;
        info!("Domain destroyed");
        Ok(())
    }

    /// Remove the persistent definition.
    #[instrument(skip(self, flags), fields(flags = %flags))]
    pub fn undefine(&self, flags: DomainUndefineFlags) -> Result<()> {
        self.check_mutation("undefine domain")?;
        self.call(|d| d.undefine(flags))?;
        info!("Domain undefined");
        Ok(())
    }

    /// Release the handle. The domain itself is left untouched.
    ///
    /// Works after the connection closed; a second call fails with
    /// `InvalidState`.
    pub fn free(&mut self) -> Result<()> {
        let mut remote = self
            .remote
            .take()
            .ok_or_else(|| VirtError::InvalidState("domain handle has already been freed".to_string()))?;
        remote.free()
    }

    pub fn is_freed(&self) -> bool {
        self.remote.is_none()
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            if let Err(e) = remote.free() {
                debug!(error = %e, "Failed to free domain handle on drop");
            }
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("mode", &self.mode)
            .field("freed", &self.is_freed())
            .finish()
    }
}
