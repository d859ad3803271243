//! Libvirt transport.
//!
//! Talks to a real libvirt daemon through the `virt` bindings. It requires
//! the `libvirt` feature to be enabled and the system to have libvirt
//! installed.

#[cfg(feature = "libvirt")]
mod driver;

#[cfg(feature = "libvirt")]
pub use driver::LibvirtDriver;

/// Check if the libvirt transport is compiled in.
pub fn is_available() -> bool {
    cfg!(feature = "libvirt")
}
