//! Secret handles.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, info, instrument};

use crate::connection::ConnectionShared;
use crate::error::{Result, VirtError};
use crate::flags::SecretUsageType;
use crate::transport::RemoteSecret;
use crate::types::AccessMode;

/// Handle to a secret on the daemon.
///
/// Same validity rules as [`Domain`](crate::Domain): no ownership of the
/// connection, every call reaches the daemon, dropped handles are freed.
pub struct Secret {
    remote: Option<Box<dyn RemoteSecret>>,
    conn: Weak<ConnectionShared>,
    mode: AccessMode,
}

impl Secret {
    pub(crate) fn new(remote: Box<dyn RemoteSecret>, conn: &Arc<ConnectionShared>) -> Self {
        Self {
            remote: Some(remote),
            conn: Arc::downgrade(conn),
            mode: conn.mode(),
        }
    }

    fn call<T>(&self, f: impl FnOnce(&dyn RemoteSecret) -> Result<T>) -> Result<T> {
        let remote = self
            .remote
            .as_deref()
            .ok_or_else(|| VirtError::InvalidState("secret handle has been freed".to_string()))?;
        let conn = self.conn.upgrade().ok_or_else(VirtError::connection_closed)?;
        conn.while_open(|_| f(remote))
    }

    pub fn uuid(&self) -> Result<String> {
        self.call(|s| s.uuid())
    }

    pub fn usage_type(&self) -> Result<SecretUsageType> {
        self.call(|s| s.usage_type())
    }

    /// Usage ID; its meaning depends on [`Secret::usage_type`].
    pub fn usage_id(&self) -> Result<String> {
        self.call(|s| s.usage_id())
    }

    pub fn xml_desc(&self) -> Result<String> {
        self.call(|s| s.xml_desc())
    }

    /// Store the secret value.
    #[instrument(skip(self, value), fields(len = value.len()))]
    pub fn set_value(&self, value: &[u8]) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(VirtError::read_only("set secret value"));
        }
        self.call(|s| s.set_value(value))?;
        info!("Secret value stored");
        Ok(())
    }

    /// Fetch the secret value. Private secrets refuse to reveal it.
    pub fn value(&self) -> Result<Vec<u8>> {
        self.call(|s| s.value())
    }

    /// Remove the secret definition.
    #[instrument(skip(self))]
    pub fn undefine(&self) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(VirtError::read_only("undefine secret"));
        }
        self.call(|s| s.undefine())?;
        info!("Secret undefined");
        Ok(())
    }

    /// Release the handle. A second call fails with `InvalidState`.
    pub fn free(&mut self) -> Result<()> {
        let mut remote = self
            .remote
            .take()
            .ok_or_else(|| VirtError::InvalidState("secret handle has already been freed".to_string()))?;
        remote.free()
    }

    pub fn is_freed(&self) -> bool {
        self.remote.is_none()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            if let Err(e) = remote.free() {
                debug!(error = %e, "Failed to free secret handle on drop");
            }
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("mode", &self.mode)
            .field("freed", &self.is_freed())
            .finish()
    }
}
