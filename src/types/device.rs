//! Device and peer descriptors returned by backends

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use ipnet::IpNet;
use serde::Serialize;

use super::Key;
use crate::error::{Result, WgCtrlError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Which kind of implementation backs a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Linux kernel module, configured over generic netlink
    LinuxKernel,
    /// Userspace daemon (wireguard-go, boringtun, ...) behind a UAPI socket
    Userspace,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinuxKernel => f.write_str("Linux kernel"),
            Self::Userspace => f.write_str("userspace"),
        }
    }
}

/// A WireGuard device as reported by one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Interface name (e.g., "wg0")
    pub name: String,
    /// Backing implementation
    pub device_type: DeviceType,
    /// Interface private key
    pub private_key: Key,
    /// Interface public key; userspace daemons do not report it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Key>,
    /// UDP listen port (0 if not listening)
    pub listen_port: u16,
    /// Firewall mark on outgoing packets (0 if unset)
    pub firewall_mark: u32,
    /// Configured peers
    pub peers: Vec<Peer>,
}

impl Device {
    /// Empty descriptor for a device that has not been filled in yet
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
            private_key: Key::default(),
            public_key: None,
            listen_port: 0,
            firewall_mark: 0,
            peers: Vec::new(),
        }
    }
}

/// A peer of a WireGuard device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peer {
    /// Peer public key
    pub public_key: Key,
    /// Preshared key (all zeros if unset)
    pub preshared_key: Key,
    /// Last known endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<SocketAddr>,
    /// Persistent keepalive interval (zero if disabled)
    pub persistent_keepalive_interval: Duration,
    /// Time of the last completed handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_handshake_time: Option<SystemTime>,
    /// Bytes received from this peer
    pub receive_bytes: u64,
    /// Bytes sent to this peer
    pub transmit_bytes: u64,
    /// IP ranges routed to this peer
    pub allowed_ips: Vec<IpNet>,
    /// Protocol version in use
    pub protocol_version: u32,
}

impl Peer {
    /// Peer with only its public key set
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            preshared_key: Key::default(),
            endpoint: None,
            persistent_keepalive_interval: Duration::ZERO,
            last_handshake_time: None,
            receive_bytes: 0,
            transmit_bytes: 0,
            allowed_ips: Vec::new(),
            protocol_version: 0,
        }
    }
}

/// Convert a (seconds, nanoseconds) handshake timestamp, zero meaning "never"
///
/// Timestamps that cannot be represented are an error.
pub(crate) fn handshake_time(secs: u64, nanos: u64) -> Result<Option<SystemTime>> {
    if secs == 0 && nanos == 0 {
        return Ok(None);
    }
    let out_of_range = || {
        WgCtrlError::malformed(format!("handshake time {}s {}ns out of range", secs, nanos))
    };

    let whole = secs
        .checked_add(nanos / NANOS_PER_SEC)
        .ok_or_else(out_of_range)?;
    let since_epoch = Duration::new(whole, (nanos % NANOS_PER_SEC) as u32);
    SystemTime::UNIX_EPOCH
        .checked_add(since_epoch)
        .map(Some)
        .ok_or_else(out_of_range)
}
