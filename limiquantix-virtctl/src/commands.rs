//! Subcommand execution.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use limiquantix_virt::{
    Connection, Domain, DomainCreateFlags, DomainDestroyFlags, DomainKey, DomainListFlags,
    DomainUndefineFlags, Secret, SecretListFlags,
};

use crate::cli::Command;

/// Host and connection summary printed by `info`.
#[derive(Debug, Serialize)]
pub struct HostInfo {
    pub uri: String,
    pub hostname: String,
    pub hypervisor: String,
    pub hypervisor_version: String,
    pub library_version: String,
    pub read_only: bool,
    pub encrypted: bool,
    pub secure: bool,
}

/// One row of `list` / `dominfo`.
#[derive(Debug, Serialize)]
pub struct DomainInfo {
    pub id: Option<u32>,
    pub name: String,
    pub uuid: String,
    pub active: bool,
    pub persistent: bool,
}

impl DomainInfo {
    fn from_domain(domain: &Domain) -> Result<Self> {
        Ok(Self {
            id: domain.id()?,
            name: domain.name()?,
            uuid: domain.uuid()?,
            active: domain.is_active()?,
            persistent: domain.is_persistent()?,
        })
    }
}

/// One row of `secret-list`.
#[derive(Debug, Serialize)]
pub struct SecretInfo {
    pub uuid: String,
    pub usage_type: String,
    pub usage_id: String,
}

impl SecretInfo {
    fn from_secret(secret: &Secret) -> Result<Self> {
        Ok(Self {
            uuid: secret.uuid()?,
            usage_type: secret.usage_type()?.to_string(),
            usage_id: secret.usage_id()?,
        })
    }
}

/// Writes results either as JSON or as plain text.
pub struct Output<'a> {
    json: bool,
    out: &'a mut dyn Write,
}

impl<'a> Output<'a> {
    pub fn new(json: bool, out: &'a mut dyn Write) -> Self {
        Self { json, out }
    }

    fn emit<T: Serialize>(&mut self, value: &T, text: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> Result<()> {
        if self.json {
            serde_json::to_writer_pretty(&mut *self.out, value)?;
            writeln!(self.out)?;
        } else {
            text(&mut *self.out)?;
        }
        Ok(())
    }

    fn done(&mut self, message: &str) -> Result<()> {
        self.emit(&serde_json::json!({ "result": message }), |out| writeln!(out, "{}", message))
    }
}

/// Interpret a user-supplied domain reference: ID, then UUID, then name.
pub fn domain_key(reference: &str) -> DomainKey<'_> {
    if let Ok(id) = reference.parse::<u32>() {
        return DomainKey::Id(id);
    }
    if reference.len() == 36 && reference.matches('-').count() == 4 {
        return DomainKey::Uuid(reference);
    }
    DomainKey::Name(reference)
}

fn read_descriptor(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read descriptor: {}", path.display()))
}

/// Run one subcommand against an open connection.
pub fn run(conn: &Connection, command: &Command, out: &mut Output<'_>) -> Result<()> {
    debug!(?command, "Running command");

    match command {
        Command::Info => {
            let info = HostInfo {
                uri: conn.uri()?,
                hostname: conn.hostname()?,
                hypervisor: conn.hypervisor_type()?,
                hypervisor_version: conn.version()?.to_string(),
                library_version: conn.lib_version()?.to_string(),
                read_only: conn.is_read_only(),
                encrypted: conn.is_encrypted()?,
                secure: conn.is_secure()?,
            };
            out.emit(&info, |w| {
                writeln!(w, "URI:            {}", info.uri)?;
                writeln!(w, "Hostname:       {}", info.hostname)?;
                writeln!(w, "Hypervisor:     {} {}", info.hypervisor, info.hypervisor_version)?;
                writeln!(w, "Library:        {}", info.library_version)?;
                writeln!(w, "Read-only:      {}", info.read_only)?;
                writeln!(w, "Encrypted:      {}", info.encrypted)?;
                writeln!(w, "Secure:         {}", info.secure)
            })
        }

        Command::CpuModels { arch } => {
            let models = conn.cpu_model_names(arch)?;
            out.emit(&models, |w| {
                for model in &models {
                    writeln!(w, "{}", model)?;
                }
                Ok(())
            })
        }

        Command::MaxVcpus { kind } => {
            let max = conn.max_vcpus(kind)?;
            out.emit(&max, |w| writeln!(w, "{}", max))
        }

        Command::List { all, inactive } => {
            let flags = if *inactive {
                DomainListFlags::INACTIVE
            } else if *all {
                DomainListFlags::ALL
            } else {
                DomainListFlags::ACTIVE
            };

            let rows = conn
                .list_domains(flags)?
                .iter()
                .map(DomainInfo::from_domain)
                .collect::<Result<Vec<_>>>()?;

            out.emit(&rows, |w| {
                writeln!(w, "{:>5}  {:<24} {:<10}", "Id", "Name", "State")?;
                for row in &rows {
                    let id = row.id.map_or_else(|| "-".to_string(), |id| id.to_string());
                    let state = if row.active { "running" } else { "shut off" };
                    writeln!(w, "{:>5}  {:<24} {:<10}", id, row.name, state)?;
                }
                Ok(())
            })
        }

        Command::Dominfo { domain } => {
            let domain = conn.lookup_domain(domain_key(domain))?;
            let row = DomainInfo::from_domain(&domain)?;
            out.emit(&row, |w| {
                let id = row.id.map_or_else(|| "-".to_string(), |id| id.to_string());
                writeln!(w, "Id:             {}", id)?;
                writeln!(w, "Name:           {}", row.name)?;
                writeln!(w, "UUID:           {}", row.uuid)?;
                writeln!(w, "Active:         {}", row.active)?;
                writeln!(w, "Persistent:     {}", row.persistent)
            })
        }

        Command::Dumpxml { domain } => {
            let xml = conn.lookup_domain(domain_key(domain))?.xml_desc()?;
            out.emit(&serde_json::json!({ "xml": xml }), |w| writeln!(w, "{}", xml))
        }

        Command::Define { file } => {
            let domain = conn.define_domain(&read_descriptor(file)?)?;
            let name = domain.name()?;
            info!(name = %name, "Domain defined");
            out.done(&format!("Domain '{}' defined", name))
        }

        Command::Create {
            file,
            paused,
            autodestroy,
        } => {
            let mut flags = DomainCreateFlags::DEFAULT;
            if *paused {
                flags = flags | DomainCreateFlags::START_PAUSED;
            }
            if *autodestroy {
                flags = flags | DomainCreateFlags::START_AUTODESTROY;
            }

            let domain = conn.create_domain(&read_descriptor(file)?, flags)?;
            out.done(&format!("Domain '{}' created", domain.name()?))
        }

        Command::Start { domain, paused } => {
            let flags = if *paused {
                DomainCreateFlags::START_PAUSED
            } else {
                DomainCreateFlags::DEFAULT
            };
            let handle = conn.lookup_domain(domain_key(domain))?;
            handle.create(flags)?;
            out.done(&format!("Domain '{}' started", handle.name()?))
        }

        Command::Destroy { domain, graceful } => {
            let flags = if *graceful {
                DomainDestroyFlags::GRACEFUL
            } else {
                DomainDestroyFlags::DEFAULT
            };
            let handle = conn.lookup_domain(domain_key(domain))?;
            let name = handle.name()?;
            handle.destroy(flags)?;
            out.done(&format!("Domain '{}' destroyed", name))
        }

        Command::Undefine {
            domain,
            nvram,
            keep_nvram,
        } => {
            let mut flags = DomainUndefineFlags::DEFAULT;
            if *nvram {
                flags = flags | DomainUndefineFlags::NVRAM;
            }
            if *keep_nvram {
                flags = flags | DomainUndefineFlags::KEEP_NVRAM;
            }

            let handle = conn.lookup_domain(domain_key(domain))?;
            let name = handle.name()?;
            handle.undefine(flags)?;
            out.done(&format!("Domain '{}' has been undefined", name))
        }

        Command::SecretList => {
            let rows = conn
                .list_secrets(SecretListFlags::ALL)?
                .iter()
                .map(SecretInfo::from_secret)
                .collect::<Result<Vec<_>>>()?;

            out.emit(&rows, |w| {
                writeln!(w, "{:<36}  Usage", "UUID")?;
                for row in &rows {
                    writeln!(w, "{:<36}  {} {}", row.uuid, row.usage_type, row.usage_id)?;
                }
                Ok(())
            })
        }

        Command::SecretDefine { file } => {
            let secret = conn.define_secret(&read_descriptor(file)?)?;
            out.done(&format!("Secret {} created", secret.uuid()?))
        }

        Command::SecretSetValue { uuid, value } => {
            conn.lookup_secret_by_uuid(uuid)?.set_value(value.as_bytes())?;
            out.done("Secret value set")
        }

        Command::SecretGetValue { uuid } => {
            let value = conn.lookup_secret_by_uuid(uuid)?.value()?;
            let value = String::from_utf8_lossy(&value).into_owned();
            out.emit(&serde_json::json!({ "value": value }), |w| writeln!(w, "{}", value))
        }

        Command::SecretUndefine { uuid } => {
            conn.lookup_secret_by_uuid(uuid)?.undefine()?;
            out.done(&format!("Secret {} deleted", uuid))
        }
    }
}
