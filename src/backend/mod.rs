//! Backend transports
//!
//! A backend is one mechanism for reading and configuring WireGuard devices:
//! - `Kernel`: the Linux kernel module over generic netlink
//! - `Userspace`: a UAPI socket served by a userspace daemon
//!
//! The client only sees the `Backend` trait. Which backends exist on a host is
//! decided by a `HostProbe`, and a `BackendFactory` opens them.

#[cfg(target_os = "linux")]
mod kernel;
#[cfg(any(target_os = "linux", test))]
mod netlink;
#[cfg(unix)]
mod userspace;

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::error::{Result, WgCtrlError};
use crate::types::{Config, Device};

#[cfg(target_os = "linux")]
pub use kernel::KernelBackend;
#[cfg(unix)]
pub use userspace::UserspaceBackend;

/// Default directory holding userspace daemon sockets
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/wireguard";

/// Transport families, in precedence order
///
/// The derived ordering is the order backends are consulted in: kernel
/// devices are listed before userspace ones, and a kernel device shadows a
/// userspace device of the same name on fetch and configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    Kernel,
    Userspace,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => f.write_str("kernel"),
            Self::Userspace => f.write_str("userspace"),
        }
    }
}

/// One mechanism for reading and configuring WireGuard devices
///
/// `device` and `configure_device` must return `WgCtrlError::NotFound` when
/// the name is not owned by this backend, and never for any other failure;
/// the client relies on that to decide whether to try the next backend.
///
/// Implementations must be safe to call from several threads at once if the
/// client is shared that way. The client adds no locking of its own.
pub trait Backend: Send + Sync {
    /// Transport family of this backend
    fn kind(&self) -> BackendKind;

    /// All devices owned by this backend
    fn devices(&self) -> Result<Vec<Device>>;

    /// One device by interface name
    fn device(&self, name: &str) -> Result<Device>;

    /// Apply a configuration to one device by interface name
    fn configure_device(&self, name: &str, config: &Config) -> Result<()>;

    /// Release resources; called exactly once by the owning client
    fn close(&mut self) -> Result<()>;
}

/// Decides which transport families to attempt on this host
pub trait HostProbe {
    fn backend_kinds(&self) -> Vec<BackendKind>;
}

/// Probe based only on the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsProbe {
    os: &'static str,
}

impl OsProbe {
    /// Probe for the OS this binary was built for
    pub const fn current() -> Self {
        Self {
            os: std::env::consts::OS,
        }
    }

    /// Probe for a named OS, as spelled by `std::env::consts::OS`
    pub const fn for_os(os: &'static str) -> Self {
        Self { os }
    }
}

impl Default for OsProbe {
    fn default() -> Self {
        Self::current()
    }
}

impl HostProbe for OsProbe {
    fn backend_kinds(&self) -> Vec<BackendKind> {
        // TODO: check for the wireguard genl family instead of the OS name
        if self.os == "linux" {
            vec![BackendKind::Kernel, BackendKind::Userspace]
        } else {
            vec![BackendKind::Userspace]
        }
    }
}

/// Opens the backend for one transport family
pub trait BackendFactory {
    fn open(&self, kind: BackendKind) -> Result<Box<dyn Backend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(BackendKind) -> Result<Box<dyn Backend>>,
{
    fn open(&self, kind: BackendKind) -> Result<Box<dyn Backend>> {
        self(kind)
    }
}

/// Factory for the real kernel and userspace backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultFactory {
    socket_dir: PathBuf,
}

impl DefaultFactory {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }
}

impl Default for DefaultFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_DIR)
    }
}

impl BackendFactory for DefaultFactory {
    fn open(&self, kind: BackendKind) -> Result<Box<dyn Backend>> {
        match kind {
            #[cfg(target_os = "linux")]
            BackendKind::Kernel => Ok(Box::new(KernelBackend::open()?)),
            #[cfg(unix)]
            BackendKind::Userspace => Ok(Box::new(UserspaceBackend::new(&self.socket_dir))),
            #[allow(unreachable_patterns)]
            other => Err(WgCtrlError::Init {
                backend: other,
                source: io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{} backend is not supported on {}", other, std::env::consts::OS),
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_probe_linux_lists_kernel_first() {
        let kinds = OsProbe::for_os("linux").backend_kinds();
        assert_eq!(kinds, vec![BackendKind::Kernel, BackendKind::Userspace]);
    }

    #[test]
    fn test_os_probe_other_is_userspace_only() {
        for os in ["macos", "freebsd", "openbsd", "windows"] {
            assert_eq!(OsProbe::for_os(os).backend_kinds(), vec![BackendKind::Userspace]);
        }
    }

    #[test]
    fn test_precedence_order() {
        assert!(BackendKind::Kernel < BackendKind::Userspace);
    }
}
