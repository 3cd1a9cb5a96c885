//! Configuration requests applied to a device
//!
//! Every `Option` field left as `None` means "leave unchanged". Backends
//! forward only the fields that are set.

use std::net::SocketAddr;
use std::time::Duration;

use ipnet::IpNet;

use super::Key;

/// Changes to apply to one WireGuard device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// New private key
    pub private_key: Option<Key>,
    /// New UDP listen port
    pub listen_port: Option<u16>,
    /// New firewall mark (0 clears it)
    pub firewall_mark: Option<u32>,
    /// Remove all existing peers before applying `peers`
    pub replace_peers: bool,
    /// Per-peer changes
    pub peers: Vec<PeerConfig>,
}

/// Changes to apply to one peer, identified by its public key
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    /// Peer public key
    pub public_key: Key,
    /// Remove this peer instead of updating it
    pub remove: bool,
    /// Only touch the peer if it already exists
    pub update_only: bool,
    /// New preshared key
    pub preshared_key: Option<Key>,
    /// New endpoint
    pub endpoint: Option<SocketAddr>,
    /// New persistent keepalive interval (zero disables it)
    pub persistent_keepalive_interval: Option<Duration>,
    /// Remove existing allowed IPs before applying `allowed_ips`
    pub replace_allowed_ips: bool,
    /// Allowed IPs to add
    pub allowed_ips: Vec<IpNet>,
}

impl PeerConfig {
    /// Peer change that only names the peer
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            remove: false,
            update_only: false,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive_interval: None,
            replace_allowed_ips: false,
            allowed_ips: Vec::new(),
        }
    }
}

impl Config {
    /// Check if applying this request would change nothing
    pub fn is_empty(&self) -> bool {
        self.private_key.is_none()
            && self.listen_port.is_none()
            && self.firewall_mark.is_none()
            && !self.replace_peers
            && self.peers.is_empty()
    }
}
