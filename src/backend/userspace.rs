//! Userspace backend over the cross-platform UAPI socket protocol
//!
//! Each userspace daemon (wireguard-go, boringtun, ...) listens on
//! `<socket_dir>/<interface>.sock` and speaks a line-based `key=value`
//! protocol: a `get=1` or `set=1` request terminated by a blank line, answered
//! by `key=value` lines ending in `errno=N` and a blank line.

use std::io::{self, BufRead, BufReader, Write};
use std::net::SocketAddr;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::IpNet;

use super::{Backend, BackendKind};
use crate::error::{Result, TransportError, WgCtrlError};
use crate::types::{handshake_time, Config, Device, DeviceType, Key, Peer};

/// Socket file extension used by UAPI daemons
const SOCKET_EXTENSION: &str = "sock";

/// Backend talking to userspace daemons through their UAPI sockets
#[derive(Debug, Clone)]
pub struct UserspaceBackend {
    socket_dir: PathBuf,
}

impl UserspaceBackend {
    /// Create a backend looking for sockets in `socket_dir`
    ///
    /// No I/O happens here; the directory may not exist yet.
    pub fn new(socket_dir: impl AsRef<Path>) -> Self {
        Self {
            socket_dir: socket_dir.as_ref().to_path_buf(),
        }
    }

    /// Directory searched for daemon sockets
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Socket path for an interface, or `None` if the name could escape the
    /// socket directory
    fn socket_path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return None;
        }
        Some(self.socket_dir.join(format!("{}.{}", name, SOCKET_EXTENSION)))
    }

    fn connect(&self, name: &str) -> Result<UnixStream> {
        let path = self
            .socket_path(name)
            .ok_or_else(|| WgCtrlError::not_found(name))?;

        match UnixStream::connect(&path) {
            Ok(stream) => Ok(stream),
            // A missing socket or a dead daemon leaving its socket behind
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                tracing::debug!("No userspace daemon for {} at {:?}: {}", name, path, e);
                Err(WgCtrlError::not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Interface names with a socket in the socket directory, sorted
    fn socket_names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.socket_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Socket directory {:?} does not exist", self.socket_dir);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SOCKET_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Backend for UserspaceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Userspace
    }

    fn devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        for name in self.socket_names()? {
            match self.device(&name) {
                Ok(device) => devices.push(device),
                // Daemon exited between listing and connecting
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Skipping stale userspace socket for {}", name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(devices)
    }

    fn device(&self, name: &str) -> Result<Device> {
        let mut stream = self.connect(name)?;
        stream.write_all(b"get=1\n\n")?;
        parse_get_response(name, BufReader::new(stream))
    }

    fn configure_device(&self, name: &str, config: &Config) -> Result<()> {
        let mut stream = self.connect(name)?;
        stream.write_all(set_request(config).as_bytes())?;

        let reader = BufReader::new(stream);
        match read_errno(reader)? {
            0 => Ok(()),
            errno => Err(TransportError::Uapi { errno }.into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        // Connections are per call; nothing is held open
        Ok(())
    }
}

/// Peer being assembled from `get` response lines
struct PeerState {
    peer: Peer,
    handshake_sec: u64,
    handshake_nsec: u64,
}

impl PeerState {
    fn new(public_key: Key) -> Self {
        Self {
            peer: Peer::new(public_key),
            handshake_sec: 0,
            handshake_nsec: 0,
        }
    }

    fn finish(self) -> Result<Peer> {
        let mut peer = self.peer;
        peer.last_handshake_time = handshake_time(self.handshake_sec, self.handshake_nsec)?;
        Ok(peer)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "preshared_key" => self.peer.preshared_key = parse_key(key, value)?,
            "endpoint" => {
                let endpoint: SocketAddr = parse_value(key, value)?;
                self.peer.endpoint = Some(endpoint);
            }
            "last_handshake_time_sec" => self.handshake_sec = parse_value(key, value)?,
            "last_handshake_time_nsec" => self.handshake_nsec = parse_value(key, value)?,
            "tx_bytes" => self.peer.transmit_bytes = parse_value(key, value)?,
            "rx_bytes" => self.peer.receive_bytes = parse_value(key, value)?,
            "persistent_keepalive_interval" => {
                self.peer.persistent_keepalive_interval =
                    Duration::from_secs(parse_value(key, value)?);
            }
            "allowed_ip" => {
                let ip: IpNet = parse_value(key, value)?;
                self.peer.allowed_ips.push(ip);
            }
            "protocol_version" => self.peer.protocol_version = parse_value(key, value)?,
            _ => tracing::debug!("Unknown peer key: {}", key),
        }
        Ok(())
    }
}

/// Parse the reply to `get=1` into a device
fn parse_get_response<R: BufRead>(name: &str, reader: R) -> Result<Device> {
    let mut device = Device::new(name, DeviceType::Userspace);
    let mut current: Option<PeerState> = None;
    let mut errno: Option<i32> = None;

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }

        let (key, value) = split_line(&line)?;
        match key {
            "errno" => errno = Some(parse_value(key, value)?),
            "private_key" => device.private_key = parse_key(key, value)?,
            "listen_port" => device.listen_port = parse_value(key, value)?,
            "fwmark" => device.firewall_mark = parse_value(key, value)?,
            "public_key" => {
                if let Some(peer) = current.take() {
                    device.peers.push(peer.finish()?);
                }
                current = Some(PeerState::new(parse_key(key, value)?));
            }
            _ => match current.as_mut() {
                Some(peer) => peer.apply(key, value)?,
                None => tracing::debug!("Unknown device key: {}", key),
            },
        }
    }

    if let Some(peer) = current.take() {
        device.peers.push(peer.finish()?);
    }

    match errno {
        Some(0) => Ok(device),
        Some(errno) => Err(TransportError::Uapi { errno }.into()),
        None => Err(WgCtrlError::malformed("get response missing errno")),
    }
}

/// Read a reply that carries only `errno=N`
fn read_errno<R: BufRead>(reader: R) -> Result<i32> {
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }
        let (key, value) = split_line(&line)?;
        if key == "errno" {
            return parse_value(key, value);
        }
        tracing::debug!("Ignoring unexpected key in set response: {}", key);
    }
    Err(WgCtrlError::malformed("set response missing errno"))
}

/// Encode a `set=1` request carrying only the fields present in `config`
fn set_request(config: &Config) -> String {
    let mut out = String::from("set=1\n");

    if let Some(key) = &config.private_key {
        out.push_str(&format!("private_key={}\n", key.to_hex()));
    }
    if let Some(port) = config.listen_port {
        out.push_str(&format!("listen_port={}\n", port));
    }
    if let Some(mark) = config.firewall_mark {
        out.push_str(&format!("fwmark={}\n", mark));
    }
    if config.replace_peers {
        out.push_str("replace_peers=true\n");
    }

    for peer in &config.peers {
        out.push_str(&format!("public_key={}\n", peer.public_key.to_hex()));
        if peer.remove {
            out.push_str("remove=true\n");
            continue;
        }
        if peer.update_only {
            out.push_str("update_only=true\n");
        }
        if let Some(psk) = &peer.preshared_key {
            out.push_str(&format!("preshared_key={}\n", psk.to_hex()));
        }
        if let Some(endpoint) = peer.endpoint {
            out.push_str(&format!("endpoint={}\n", endpoint));
        }
        if let Some(interval) = peer.persistent_keepalive_interval {
            out.push_str(&format!(
                "persistent_keepalive_interval={}\n",
                interval.as_secs()
            ));
        }
        if peer.replace_allowed_ips {
            out.push_str("replace_allowed_ips=true\n");
        }
        for ip in &peer.allowed_ips {
            out.push_str(&format!("allowed_ip={}\n", ip));
        }
    }

    out.push('\n');
    out
}

fn split_line(line: &str) -> Result<(&str, &str)> {
    line.split_once('=')
        .ok_or_else(|| WgCtrlError::malformed(format!("expected 'key=value', got: {}", line)))
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| WgCtrlError::malformed(format!("invalid {}: {}", key, value)))
}

fn parse_key(field: &str, value: &str) -> Result<Key> {
    Key::from_hex(value).map_err(|e| WgCtrlError::malformed(format!("{}: {}", field, e)))
}
