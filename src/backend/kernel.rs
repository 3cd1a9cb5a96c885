//! Linux kernel backend over generic netlink
//!
//! Devices are discovered through sysfs (`DEVTYPE=wireguard` in the
//! interface uevent) and read or configured with the `wireguard` generic
//! netlink family. If the family is not registered (module not loaded) the
//! backend simply owns no devices.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::netlink::{self, Reply};
use super::{Backend, BackendKind};
use crate::error::{Result, TransportError, WgCtrlError};
use crate::types::{Config, Device};

/// Where the kernel lists network interfaces
const SYSFS_NET: &str = "/sys/class/net";

/// Receive buffer size; dump messages are at most a few pages
const RECV_BUFFER_SIZE: usize = 32 * 1024;

/// Open netlink socket and the state of the request/reply exchange
struct Inner {
    fd: OwnedFd,
    seq: u32,
    family: Option<u16>,
}

/// Backend for devices created by the Linux kernel module
pub struct KernelBackend {
    // Requests and replies on one socket must not interleave
    inner: Mutex<Option<Inner>>,
}

impl KernelBackend {
    /// Open a generic netlink socket
    pub fn open() -> Result<Self> {
        let fd = open_socket().map_err(|source| WgCtrlError::Init {
            backend: BackendKind::Kernel,
            source,
        })?;
        tracing::debug!("Opened generic netlink socket for {} family", netlink::WG_GENL_NAME);

        Ok(Self {
            inner: Mutex::new(Some(Inner {
                fd,
                seq: 0,
                family: None,
            })),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Inner>>> {
        self.inner
            .lock()
            .map_err(|_| WgCtrlError::from(io::Error::other("netlink socket lock poisoned")))
    }

    /// Run `f` with the open socket and the resolved family id, or return
    /// `Ok(None)` when the WireGuard family is not registered
    fn with_family<T>(&self, f: impl FnOnce(&mut Inner, u16) -> Result<T>) -> Result<Option<T>> {
        let mut guard = self.lock()?;
        let inner = guard.as_mut().ok_or_else(|| {
            WgCtrlError::from(io::Error::new(
                io::ErrorKind::NotConnected,
                "kernel backend is closed",
            ))
        })?;

        match inner.family()? {
            Some(family) => f(inner, family).map(Some),
            None => Ok(None),
        }
    }
}

impl Inner {
    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Resolve the WireGuard family id; not cached while it is absent so a
    /// module loaded later is picked up
    fn family(&mut self) -> Result<Option<u16>> {
        if let Some(family) = self.family {
            return Ok(Some(family));
        }

        let seq = self.next_seq();
        match self.exchange(seq, &netlink::get_family_message(seq)?) {
            Ok(payloads) => {
                let payload = payloads
                    .first()
                    .ok_or_else(|| WgCtrlError::malformed("empty family reply"))?;
                let family = netlink::parse_family_id(payload)?;
                tracing::debug!("Resolved {} family id {}", netlink::WG_GENL_NAME, family);
                self.family = Some(family);
                Ok(Some(family))
            }
            Err(WgCtrlError::Transport(TransportError::Netlink { errno }))
                if errno == libc::ENOENT =>
            {
                tracing::debug!("{} netlink family not registered", netlink::WG_GENL_NAME);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Send one request and collect the data payloads of its reply
    fn exchange(&mut self, seq: u32, request: &[u8]) -> Result<Vec<Vec<u8>>> {
        send(&self.fd, request)?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut payloads = Vec::new();
        loop {
            let n = recv(&self.fd, &mut buf)?;
            for (reply_seq, reply) in netlink::parse_replies(&buf[..n])? {
                // Leftovers from an earlier exchange
                if reply_seq != seq {
                    continue;
                }
                match reply {
                    Reply::Data(payload) => payloads.push(payload.to_vec()),
                    Reply::Done | Reply::Error(0) => return Ok(payloads),
                    Reply::Error(errno) => return Err(TransportError::Netlink { errno }.into()),
                }
            }
        }
    }
}

/// Reclassify the kernel's "no such WireGuard device" answers
fn not_found_for(name: &str, err: WgCtrlError) -> WgCtrlError {
    match err {
        WgCtrlError::Transport(TransportError::Netlink { errno })
            if errno == libc::ENODEV || errno == libc::EOPNOTSUPP =>
        {
            WgCtrlError::not_found(name)
        }
        other => other,
    }
}

impl Backend for KernelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kernel
    }

    fn devices(&self) -> Result<Vec<Device>> {
        // No family means no kernel devices at all
        if self.with_family(|_, family| Ok(family))?.is_none() {
            return Ok(Vec::new());
        }

        let mut devices = Vec::new();
        for name in wireguard_interfaces(Path::new(SYSFS_NET))? {
            match self.device(&name) {
                Ok(device) => devices.push(device),
                // Interface removed after the sysfs scan
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Kernel device {} disappeared while listing", name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(devices)
    }

    fn device(&self, name: &str) -> Result<Device> {
        let payloads = self
            .with_family(|inner, family| {
                let seq = inner.next_seq();
                inner.exchange(seq, &netlink::get_device_message(family, seq, name)?)
            })
            .map_err(|e| not_found_for(name, e))?
            .ok_or_else(|| WgCtrlError::not_found(name))?;

        if payloads.is_empty() {
            return Err(WgCtrlError::not_found(name));
        }
        netlink::parse_device(name, &payloads)
    }

    fn configure_device(&self, name: &str, config: &Config) -> Result<()> {
        self.with_family(|inner, family| {
            let seq = inner.next_seq();
            inner
                .exchange(seq, &netlink::set_device_message(family, seq, name, config)?)
                .map(drop)
        })
        .map_err(|e| not_found_for(name, e))?
        .ok_or_else(|| WgCtrlError::not_found(name))
    }

    fn close(&mut self) -> Result<()> {
        let inner = self
            .inner
            .get_mut()
            .map_err(|_| WgCtrlError::Release {
                backend: BackendKind::Kernel,
                source: io::Error::other("netlink socket lock poisoned"),
            })?
            .take();

        if let Some(inner) = inner {
            // Dropping an OwnedFd ignores close(2) errors, so close by hand
            let fd = inner.fd.into_raw_fd();
            // SAFETY: fd was just released from its OwnedFd and is closed
            // exactly once here.
            if unsafe { libc::close(fd) } < 0 {
                return Err(WgCtrlError::Release {
                    backend: BackendKind::Kernel,
                    source: io::Error::last_os_error(),
                });
            }
            tracing::debug!("Closed generic netlink socket");
        }
        Ok(())
    }
}

/// Names of WireGuard interfaces listed under a sysfs net directory
fn wireguard_interfaces(sysfs_net: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(sysfs_net) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let uevent = match std::fs::read_to_string(entry.path().join("uevent")) {
            Ok(content) => content,
            Err(e) => {
                tracing::trace!("Skipping {:?}: {}", entry.path(), e);
                continue;
            }
        };
        if is_wireguard_uevent(&uevent) {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn is_wireguard_uevent(uevent: &str) -> bool {
    uevent.lines().any(|line| line.trim() == "DEVTYPE=wireguard")
}

fn open_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            libc::NETLINK_GENERIC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly opened descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = kernel_addr();
    // SAFETY: addr is a valid sockaddr_nl and the length matches it.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

/// Netlink address of the kernel (port id 0); also used to bind with an
/// auto-assigned port id
fn kernel_addr() -> libc::sockaddr_nl {
    // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr
}

fn send(fd: &OwnedFd, buf: &[u8]) -> io::Result<()> {
    let addr = kernel_addr();
    // SAFETY: buf and addr are valid for the lengths passed.
    let n = unsafe {
        libc::sendto(
            fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            0,
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn recv(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let n = unsafe {
            libc::recv(
                fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
