//! # limiquantix Virt
//!
//! Safe handle layer over a hypervisor management daemon.
//!
//! The crate opens reference-counted connections to a daemon, manages
//! domains (virtual machines) and secrets through handles bound to those
//! connections, and classifies every daemon failure into a [`VirtError`].
//! Transports plug in behind the [`Driver`] trait:
//! - **Libvirt** (`libvirt` feature) - talks to a real libvirtd
//! - **Mock** - in-memory daemon for tests and development
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Connector ─► Connection ─► Domain      │
//! │  (refcount, access mode)    Secret      │
//! └─────────────────────┬───────────────────┘
//!                       │ Driver / Session
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │   LibvirtDriver   │     │    MockDriver     │
//! │   (via libvirt)   │     │   (in-memory)     │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use limiquantix_virt::{Connector, DomainCreateFlags, MockDriver};
//!
//! let connector = Connector::new(Arc::new(MockDriver::new()));
//! let conn = connector.open_default()?;
//!
//! let domain = conn.create_domain(
//!     "<domain><name>my-vm</name></domain>",
//!     DomainCreateFlags::DEFAULT,
//! )?;
//! println!("{} running as {:?}", domain.name()?, domain.id()?);
//!
//! conn.close()?;
//! ```

pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod flags;
pub mod libvirt;
pub mod lookup;
pub mod mock;
pub mod secret;
pub mod transport;
pub mod types;

pub use config::{resolve_default_uri, ConnectConfig, DEFAULT_URI_ENV};
pub use connection::{Connection, Connector};
pub use domain::Domain;
pub use error::{ErrorKind, Result, VirtError};
pub use flags::*;
pub use lookup::{DomainKey, SecretKey};
pub use mock::{MockDriver, MOCK_DEFAULT_URI};
pub use secret::Secret;
pub use transport::{Driver, RemoteDomain, RemoteSecret, Session};
pub use types::{AccessMode, VersionNumber};

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtDriver;
