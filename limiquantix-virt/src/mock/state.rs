//! Daemon-side state of the in-memory hypervisor.
//!
//! All rules the real daemon enforces live here: flag allowlists, name and
//! UUID conflicts, lifecycle transitions and list filters.

use bitflags::Flags;

use crate::error::{Result, VirtError};
use crate::flags::*;

use super::descriptor::{DomainSpec, SecretSpec};

pub(super) struct DomainRecord {
    pub uuid: String,
    pub name: String,
    pub xml: String,
    /// Set while the domain runs.
    pub id: Option<u32>,
    pub persistent: bool,
    pub paused: bool,
    /// Session whose closing stops this domain.
    pub autodestroy_session: Option<u64>,
}

impl DomainRecord {
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    fn matches(&self, flags: DomainListFlags) -> bool {
        type F = DomainListFlags;

        let active = self.is_active();
        let running = active && !self.paused;
        let paused = active && self.paused;

        filter_group(flags, &[(F::ACTIVE, active), (F::INACTIVE, !active)])
            && filter_group(flags, &[(F::PERSISTENT, self.persistent), (F::TRANSIENT, !self.persistent)])
            && filter_group(
                flags,
                &[(F::RUNNING, running), (F::PAUSED, paused), (F::SHUTOFF, !active), (F::OTHER, false)],
            )
            && filter_group(flags, &[(F::MANAGEDSAVE, false), (F::NO_MANAGEDSAVE, true)])
            && filter_group(flags, &[(F::AUTOSTART, false), (F::NO_AUTOSTART, true)])
            && filter_group(flags, &[(F::HAS_SNAPSHOT, false), (F::NO_SNAPSHOT, true)])
            && filter_group(flags, &[(F::HAS_CHECKPOINT, false), (F::NO_CHECKPOINT, true)])
    }

    fn stop(&mut self) {
        self.id = None;
        self.paused = false;
        self.autodestroy_session = None;
    }
}

pub(super) struct SecretRecord {
    pub uuid: String,
    pub usage_type: SecretUsageType,
    pub usage_id: String,
    pub ephemeral: bool,
    pub private: bool,
    pub xml: String,
    pub value: Option<Vec<u8>>,
}

impl SecretRecord {
    fn matches(&self, flags: SecretListFlags) -> bool {
        type F = SecretListFlags;

        filter_group(flags, &[(F::EPHEMERAL, self.ephemeral), (F::NO_EPHEMERAL, !self.ephemeral)])
            && filter_group(flags, &[(F::PRIVATE, self.private), (F::NO_PRIVATE, !self.private)])
    }
}

/// A filter group passes when none of its flags is requested or when any
/// requested flag holds.
fn filter_group<T: Flags + Copy>(flags: T, members: &[(T, bool)]) -> bool {
    let mut requested = members.iter().filter(|(f, _)| flags.contains(*f)).peekable();
    requested.peek().is_none() || requested.any(|(_, holds)| *holds)
}

fn check_flags(unknown: u32, call: &str) -> Result<()> {
    if unknown != 0 {
        return Err(VirtError::InvalidArgument(format!(
            "unsupported flags ({:#x}) in function {}",
            unknown, call
        )));
    }
    Ok(())
}

fn domain_not_found(uuid: &str) -> VirtError {
    VirtError::NotFound(format!("no domain with matching uuid '{}'", uuid))
}

fn secret_not_found(uuid: &str) -> VirtError {
    VirtError::NotFound(format!("no secret with matching uuid '{}'", uuid))
}

#[derive(Default)]
pub(super) struct DaemonState {
    domains: Vec<DomainRecord>,
    secrets: Vec<SecretRecord>,
    last_domain_id: u32,
}

impl DaemonState {
    // =========================================================================
    // Domains
    // =========================================================================

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn domain(&self, uuid: &str) -> Result<&DomainRecord> {
        self.domains
            .iter()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| domain_not_found(uuid))
    }

    fn domain_mut(&mut self, uuid: &str) -> Result<&mut DomainRecord> {
        self.domains
            .iter_mut()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| domain_not_found(uuid))
    }

    fn remove_domain(&mut self, uuid: &str) {
        self.domains.retain(|d| d.uuid != uuid);
    }

    fn next_domain_id(&mut self) -> u32 {
        self.last_domain_id += 1;
        self.last_domain_id
    }

    pub fn domain_by_id(&self, id: u32) -> Option<&DomainRecord> {
        self.domains.iter().find(|d| d.id == Some(id))
    }

    pub fn domain_by_name(&self, name: &str) -> Option<&DomainRecord> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn list_domains(&self, flags: DomainListFlags) -> Result<Vec<String>> {
        check_flags(flags.unknown_bits(), "virConnectListAllDomains")?;
        Ok(self
            .domains
            .iter()
            .filter(|d| d.matches(flags))
            .map(|d| d.uuid.clone())
            .collect())
    }

    /// Check that `spec` does not collide with another domain's identity.
    ///
    /// Returns the existing record `spec` refers to, if any.
    fn resolve_conflicts(&self, spec: &DomainSpec) -> Result<Option<&DomainRecord>> {
        if let Some(existing) = self.domains.iter().find(|d| d.uuid == spec.uuid) {
            if existing.name != spec.name {
                return Err(VirtError::InvalidArgument(format!(
                    "domain '{}' already exists with uuid {}",
                    existing.name, existing.uuid
                )));
            }
            return Ok(Some(existing));
        }

        if let Some(existing) = self.domain_by_name(&spec.name) {
            return Err(VirtError::InvalidArgument(format!(
                "domain '{}' is already defined with uuid {}",
                existing.name, existing.uuid
            )));
        }

        Ok(None)
    }

    pub fn define_domain(&mut self, spec: DomainSpec, xml: &str) -> Result<String> {
        if self.resolve_conflicts(&spec)?.is_some() {
            let record = self.domain_mut(&spec.uuid)?;
            record.xml = xml.to_string();
            record.persistent = true;
            return Ok(spec.uuid);
        }

        self.domains.push(DomainRecord {
            uuid: spec.uuid.clone(),
            name: spec.name,
            xml: xml.to_string(),
            id: None,
            persistent: true,
            paused: false,
            autodestroy_session: None,
        });
        Ok(spec.uuid)
    }

    pub fn create_domain(
        &mut self,
        spec: DomainSpec,
        xml: &str,
        flags: DomainCreateFlags,
        session: u64,
    ) -> Result<String> {
        check_flags(flags.unknown_bits(), "virDomainCreateXML")?;

        match self.resolve_conflicts(&spec)?.map(DomainRecord::is_active) {
            Some(true) => {
                return Err(VirtError::InvalidState(format!(
                    "domain '{}' is already active",
                    spec.name
                )));
            }
            Some(false) => {
                // An inactive persistent definition is started with the new config.
                self.domain_mut(&spec.uuid)?.xml = xml.to_string();
            }
            None => {
                self.domains.push(DomainRecord {
                    uuid: spec.uuid.clone(),
                    name: spec.name,
                    xml: xml.to_string(),
                    id: None,
                    persistent: false,
                    paused: false,
                    autodestroy_session: None,
                });
            }
        }

        self.start_domain(&spec.uuid, flags, session)?;
        Ok(spec.uuid)
    }

    pub fn start_domain(&mut self, uuid: &str, flags: DomainCreateFlags, session: u64) -> Result<()> {
        check_flags(flags.unknown_bits(), "virDomainCreateWithFlags")?;

        if self.domain(uuid)?.is_active() {
            return Err(VirtError::InvalidState("domain is already running".to_string()));
        }

        let id = self.next_domain_id();
        let record = self.domain_mut(uuid)?;
        record.id = Some(id);
        record.paused = flags.contains(DomainCreateFlags::START_PAUSED);
        record.autodestroy_session = flags
            .contains(DomainCreateFlags::START_AUTODESTROY)
            .then_some(session);
        Ok(())
    }

    pub fn destroy_domain(&mut self, uuid: &str, flags: DomainDestroyFlags) -> Result<()> {
        check_flags(flags.unknown_bits(), "virDomainDestroyFlags")?;

        let record = self.domain_mut(uuid)?;
        if !record.is_active() {
            return Err(VirtError::InvalidState("domain is not running".to_string()));
        }

        record.stop();
        if !record.persistent {
            self.remove_domain(uuid);
        }
        Ok(())
    }

    pub fn undefine_domain(&mut self, uuid: &str, flags: DomainUndefineFlags) -> Result<()> {
        type F = DomainUndefineFlags;

        check_flags(flags.unknown_bits(), "virDomainUndefineFlags")?;
        for (a, b) in [(F::NVRAM, F::KEEP_NVRAM), (F::TPM, F::KEEP_TPM)] {
            if flags.contains(a | b) {
                return Err(VirtError::InvalidArgument(format!(
                    "flags {} and {} are mutually exclusive",
                    a, b
                )));
            }
        }

        let record = self.domain_mut(uuid)?;
        if !record.persistent {
            return Err(VirtError::InvalidState("cannot undefine transient domain".to_string()));
        }

        if record.is_active() {
            record.persistent = false;
        } else {
            self.remove_domain(uuid);
        }
        Ok(())
    }

    /// Stop every domain started with autodestroy by `session`.
    pub fn release_session(&mut self, session: u64) -> usize {
        let mut stopped = 0;
        for record in self.domains.iter_mut() {
            if record.autodestroy_session == Some(session) {
                record.stop();
                stopped += 1;
            }
        }
        self.domains.retain(|d| d.persistent || d.is_active());
        stopped
    }

    // =========================================================================
    // Secrets
    // =========================================================================

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    pub fn secret(&self, uuid: &str) -> Result<&SecretRecord> {
        self.secrets
            .iter()
            .find(|s| s.uuid == uuid)
            .ok_or_else(|| secret_not_found(uuid))
    }

    pub fn secret_mut(&mut self, uuid: &str) -> Result<&mut SecretRecord> {
        self.secrets
            .iter_mut()
            .find(|s| s.uuid == uuid)
            .ok_or_else(|| secret_not_found(uuid))
    }

    pub fn secret_by_usage(&self, usage_type: SecretUsageType, usage_id: &str) -> Result<&SecretRecord> {
        if usage_type.name().is_none() {
            return Err(VirtError::InvalidArgument(format!(
                "unsupported secret usage type {}",
                usage_type.raw()
            )));
        }

        self.secrets
            .iter()
            .find(|s| s.usage_type == usage_type && s.usage_id == usage_id)
            .ok_or_else(|| {
                VirtError::NotFound(format!(
                    "no secret with matching usage {} '{}'",
                    usage_type, usage_id
                ))
            })
    }

    pub fn list_secrets(&self, flags: SecretListFlags) -> Result<Vec<String>> {
        check_flags(flags.unknown_bits(), "virConnectListAllSecrets")?;
        Ok(self
            .secrets
            .iter()
            .filter(|s| s.matches(flags))
            .map(|s| s.uuid.clone())
            .collect())
    }

    pub fn define_secret(&mut self, spec: SecretSpec, xml: &str) -> Result<String> {
        let has_usage = spec.usage_type != SecretUsageType::NONE;

        if let Some(existing) = self.secrets.iter().find(|s| {
            s.uuid != spec.uuid
                && has_usage
                && s.usage_type == spec.usage_type
                && s.usage_id == spec.usage_id
        }) {
            return Err(VirtError::InvalidArgument(format!(
                "a secret with UUID {} already defined for use with {}",
                existing.uuid, existing.usage_id
            )));
        }

        if let Ok(existing) = self.secret_mut(&spec.uuid) {
            if existing.usage_type != spec.usage_type || existing.usage_id != spec.usage_id {
                return Err(VirtError::InvalidArgument(format!(
                    "secret '{}' cannot change its usage",
                    spec.uuid
                )));
            }
            existing.ephemeral = spec.ephemeral;
            existing.private = spec.private;
            existing.xml = xml.to_string();
            return Ok(spec.uuid);
        }

        self.secrets.push(SecretRecord {
            uuid: spec.uuid.clone(),
            usage_type: spec.usage_type,
            usage_id: spec.usage_id,
            ephemeral: spec.ephemeral,
            private: spec.private,
            xml: xml.to_string(),
            value: None,
        });
        Ok(spec.uuid)
    }

    pub fn undefine_secret(&mut self, uuid: &str) -> Result<()> {
        self.secret(uuid)?;
        self.secrets.retain(|s| s.uuid != uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "c7a5fdbd-edaf-9455-926a-d65c16db1809";

    fn spec(name: &str, uuid: &str) -> DomainSpec {
        DomainSpec {
            name: name.to_string(),
            uuid: uuid.to_string(),
        }
    }

    #[test]
    fn test_define_start_destroy_undefine() {
        let mut state = DaemonState::default();
        state.define_domain(spec("web", UUID), "<domain/>").unwrap();
        assert!(!state.domain(UUID).unwrap().is_active());

        state.start_domain(UUID, DomainCreateFlags::DEFAULT, 1).unwrap();
        assert_eq!(state.domain(UUID).unwrap().id, Some(1));

        state.destroy_domain(UUID, DomainDestroyFlags::DEFAULT).unwrap();
        assert!(state.domain(UUID).unwrap().persistent);

        state.undefine_domain(UUID, DomainUndefineFlags::DEFAULT).unwrap();
        assert!(state.domain(UUID).is_err());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut state = DaemonState::default();
        state.define_domain(spec("web", UUID), "<domain/>").unwrap();

        state.start_domain(UUID, DomainCreateFlags::DEFAULT, 1).unwrap();
        state.destroy_domain(UUID, DomainDestroyFlags::DEFAULT).unwrap();
        state.start_domain(UUID, DomainCreateFlags::DEFAULT, 1).unwrap();

        assert_eq!(state.domain(UUID).unwrap().id, Some(2));
    }

    #[test]
    fn test_name_conflict_is_rejected() {
        let mut state = DaemonState::default();
        state.define_domain(spec("web", UUID), "<domain/>").unwrap();

        let other = "0a81f5b2-8403-7b23-c8d6-21ccc2f80d6f";
        assert!(state.define_domain(spec("web", other), "<domain/>").is_err());
        assert!(state.define_domain(spec("db", UUID), "<domain/>").is_err());
        assert_eq!(state.domain_count(), 1);
    }

    #[test]
    fn test_undefine_active_domain_makes_it_transient() {
        let mut state = DaemonState::default();
        state.define_domain(spec("web", UUID), "<domain/>").unwrap();
        state.start_domain(UUID, DomainCreateFlags::DEFAULT, 1).unwrap();

        state.undefine_domain(UUID, DomainUndefineFlags::DEFAULT).unwrap();
        assert!(!state.domain(UUID).unwrap().persistent);

        state.destroy_domain(UUID, DomainDestroyFlags::DEFAULT).unwrap();
        assert_eq!(state.domain_count(), 0);
    }

    #[test]
    fn test_exclusive_undefine_flags() {
        let mut state = DaemonState::default();
        state.define_domain(spec("web", UUID), "<domain/>").unwrap();

        let err = state
            .undefine_domain(UUID, DomainUndefineFlags::from_bits_retain(99))
            .unwrap_err();
        assert!(matches!(err, VirtError::InvalidArgument(_)));
        assert!(state.domain(UUID).is_ok());
    }

    #[test]
    fn test_list_filters() {
        let mut state = DaemonState::default();
        state.define_domain(spec("web", UUID), "<domain/>").unwrap();
        state
            .create_domain(
                spec("tmp", "0a81f5b2-8403-7b23-c8d6-21ccc2f80d6f"),
                "<domain/>",
                DomainCreateFlags::START_PAUSED,
                1,
            )
            .unwrap();

        assert_eq!(state.list_domains(DomainListFlags::ALL).unwrap().len(), 2);
        assert_eq!(state.list_domains(DomainListFlags::ACTIVE).unwrap().len(), 1);
        assert_eq!(state.list_domains(DomainListFlags::PAUSED).unwrap().len(), 1);
        assert_eq!(state.list_domains(DomainListFlags::RUNNING).unwrap().len(), 0);
        assert_eq!(
            state
                .list_domains(DomainListFlags::ACTIVE | DomainListFlags::INACTIVE)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            state
                .list_domains(DomainListFlags::INACTIVE | DomainListFlags::TRANSIENT)
                .unwrap()
                .len(),
            0
        );
        assert!(state.list_domains(DomainListFlags::from_bits_retain(1 << 20)).is_err());
    }

    #[test]
    fn test_release_session_stops_autodestroy_domains() {
        let mut state = DaemonState::default();
        state
            .create_domain(spec("tmp", UUID), "<domain/>", DomainCreateFlags::START_AUTODESTROY, 7)
            .unwrap();

        assert_eq!(state.release_session(8), 0);
        assert_eq!(state.domain_count(), 1);
        assert_eq!(state.release_session(7), 1);
        assert_eq!(state.domain_count(), 0);
    }

    #[test]
    fn test_secret_usage_conflict() {
        let mut state = DaemonState::default();
        let secret = |uuid: &str| SecretSpec {
            uuid: uuid.to_string(),
            usage_type: SecretUsageType::VOLUME,
            usage_id: "/var/lib/images/a.img".to_string(),
            ephemeral: false,
            private: false,
        };

        state.define_secret(secret(UUID), "<secret/>").unwrap();
        state.define_secret(secret(UUID), "<secret/>").unwrap();
        assert!(state
            .define_secret(secret("0a81f5b2-8403-7b23-c8d6-21ccc2f80d6f"), "<secret/>")
            .is_err());
        assert_eq!(state.secret_count(), 1);
    }
}
