//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// limiquantix virtctl - Manage hypervisor domains and secrets
#[derive(Parser, Debug)]
#[command(name = "limiquantix-virtctl")]
#[command(about = "limiquantix virtctl - Manage hypervisor domains and secrets")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Connection URI (e.g., qemu:///system, qemu+ssh://root@node-1/system)
    #[arg(short = 'u', long, env = "LIMIQUANTIX_VIRT_URI")]
    pub uri: Option<String>,

    /// Open the connection read-only
    #[arg(short, long)]
    pub read_only: bool,

    /// Use a fresh in-memory mock hypervisor for this run; definitions do not persist between invocations
    #[arg(long)]
    pub dev: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show connection and host information
    Info,

    /// Show CPU models supported for an architecture
    CpuModels {
        /// Architecture (e.g., x86_64, aarch64)
        arch: String,
    },

    /// Show the maximum vCPUs for a virtualization type
    MaxVcpus {
        /// Virtualization type (e.g., kvm, qemu)
        #[arg(default_value = "kvm")]
        kind: String,
    },

    /// List domains
    List {
        /// Include inactive domains
        #[arg(short, long)]
        all: bool,

        /// Only inactive domains
        #[arg(long, conflicts_with = "all")]
        inactive: bool,
    },

    /// Show a domain's state
    Dominfo {
        /// Domain ID, name or UUID
        domain: String,
    },

    /// Print a domain's XML descriptor
    Dumpxml {
        /// Domain ID, name or UUID
        domain: String,
    },

    /// Define a persistent domain from an XML file
    Define {
        /// Path to the domain XML descriptor
        file: PathBuf,
    },

    /// Create and start a transient domain from an XML file
    Create {
        /// Path to the domain XML descriptor
        file: PathBuf,

        /// Leave the guest CPUs paused
        #[arg(long)]
        paused: bool,

        /// Destroy the domain when the connection closes
        #[arg(long)]
        autodestroy: bool,
    },

    /// Start a defined domain
    Start {
        /// Domain ID, name or UUID
        domain: String,

        /// Leave the guest CPUs paused
        #[arg(long)]
        paused: bool,
    },

    /// Power off a running domain
    Destroy {
        /// Domain ID, name or UUID
        domain: String,

        /// Fail instead of killing the process forcibly
        #[arg(long)]
        graceful: bool,
    },

    /// Remove a domain's persistent definition
    Undefine {
        /// Domain ID, name or UUID
        domain: String,

        /// Also remove NVRAM
        #[arg(long, conflicts_with = "keep_nvram")]
        nvram: bool,

        /// Keep NVRAM
        #[arg(long)]
        keep_nvram: bool,
    },

    /// List secrets
    SecretList,

    /// Define a secret from an XML file
    SecretDefine {
        /// Path to the secret XML descriptor
        file: PathBuf,
    },

    /// Store a secret value
    SecretSetValue {
        /// Secret UUID
        uuid: String,

        /// New value
        value: String,
    },

    /// Print a secret value
    SecretGetValue {
        /// Secret UUID
        uuid: String,
    },

    /// Remove a secret
    SecretUndefine {
        /// Secret UUID
        uuid: String,
    },
}
