//! Generic netlink codec for the WireGuard kernel family
//!
//! Pure encoding and decoding; the socket lives in `kernel.rs`.
//!
//! Message layout:
//! ```text
//! nlmsghdr  (16 bytes): len u32 | type u16 | flags u16 | seq u32 | pid u32
//! genlmsghdr (4 bytes): cmd u8 | version u8 | reserved u16
//! attributes          : len u16 | type u16 | payload, padded to 4 bytes
//! ```
//! Header fields use host byte order. Ports inside socket addresses are
//! big-endian.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use ipnet::IpNet;

use crate::error::{Result, TransportError, WgCtrlError};
use crate::types::{handshake_time, Config, Device, DeviceType, Key, Peer, PeerConfig};

// Netlink
const NLMSG_HDRLEN: usize = 16;
const GENL_HDRLEN: usize = 4;
const NLA_HDRLEN: usize = 4;

const NLM_F_REQUEST: u16 = 0x1;
const NLM_F_ACK: u16 = 0x4;
const NLM_F_DUMP: u16 = 0x300;

const NLMSG_ERROR: u16 = 0x2;
const NLMSG_DONE: u16 = 0x3;

const NLA_F_NESTED: u16 = 0x8000;
const NLA_F_NET_BYTEORDER: u16 = 0x4000;
const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// Generic netlink controller
const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_VERSION: u8 = 1;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;

// WireGuard family (include/uapi/linux/wireguard.h)
pub(super) const WG_GENL_NAME: &str = "wireguard";
const WG_GENL_VERSION: u8 = 1;
const WG_CMD_GET_DEVICE: u8 = 0;
const WG_CMD_SET_DEVICE: u8 = 1;

const WGDEVICE_F_REPLACE_PEERS: u32 = 1 << 0;

const WGDEVICE_A_IFNAME: u16 = 2;
const WGDEVICE_A_PRIVATE_KEY: u16 = 3;
const WGDEVICE_A_PUBLIC_KEY: u16 = 4;
const WGDEVICE_A_FLAGS: u16 = 5;
const WGDEVICE_A_LISTEN_PORT: u16 = 6;
const WGDEVICE_A_FWMARK: u16 = 7;
const WGDEVICE_A_PEERS: u16 = 8;

const WGPEER_F_REMOVE_ME: u32 = 1 << 0;
const WGPEER_F_REPLACE_ALLOWEDIPS: u32 = 1 << 1;
const WGPEER_F_UPDATE_ONLY: u32 = 1 << 2;

const WGPEER_A_PUBLIC_KEY: u16 = 1;
const WGPEER_A_PRESHARED_KEY: u16 = 2;
const WGPEER_A_FLAGS: u16 = 3;
const WGPEER_A_ENDPOINT: u16 = 4;
const WGPEER_A_PERSISTENT_KEEPALIVE_INTERVAL: u16 = 5;
const WGPEER_A_LAST_HANDSHAKE_TIME: u16 = 6;
const WGPEER_A_RX_BYTES: u16 = 7;
const WGPEER_A_TX_BYTES: u16 = 8;
const WGPEER_A_ALLOWEDIPS: u16 = 9;
const WGPEER_A_PROTOCOL_VERSION: u16 = 10;

const WGALLOWEDIP_A_FAMILY: u16 = 1;
const WGALLOWEDIP_A_IPADDR: u16 = 2;
const WGALLOWEDIP_A_CIDR_MASK: u16 = 3;

// Linux address families
const AF_INET: u16 = 2;
const AF_INET6: u16 = 10;

const SOCKADDR_IN_LEN: usize = 16;
const SOCKADDR_IN6_LEN: usize = 28;

const fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// Builds one generic netlink request
///
/// The first attribute too long for its u16 length field is remembered and
/// reported by `finish`.
pub(super) struct MessageBuilder {
    buf: Vec<u8>,
    oversized: Option<usize>,
}

impl MessageBuilder {
    pub(super) fn new(family: u16, flags: u16, seq: u32, cmd: u8, version: u8) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&0u32.to_ne_bytes()); // length, patched in finish()
        buf.extend_from_slice(&family.to_ne_bytes());
        buf.extend_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // port id, filled by kernel
        buf.push(cmd);
        buf.push(version);
        buf.extend_from_slice(&0u16.to_ne_bytes());
        Self {
            buf,
            oversized: None,
        }
    }

    fn attr_len(&mut self, len: usize) -> u16 {
        u16::try_from(len).unwrap_or_else(|_| {
            if self.oversized.is_none() {
                self.oversized = Some(len);
            }
            0
        })
    }

    fn put(&mut self, attr_type: u16, data: &[u8]) {
        let len = self.attr_len(NLA_HDRLEN + data.len());
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
        self.buf.extend_from_slice(data);
        self.pad();
    }

    fn pad(&mut self) {
        let padded = align(self.buf.len());
        self.buf.resize(padded, 0);
    }

    fn put_u8(&mut self, attr_type: u16, value: u8) {
        self.put(attr_type, &[value]);
    }

    fn put_u16(&mut self, attr_type: u16, value: u16) {
        self.put(attr_type, &value.to_ne_bytes());
    }

    fn put_u32(&mut self, attr_type: u16, value: u32) {
        self.put(attr_type, &value.to_ne_bytes());
    }

    fn put_str(&mut self, attr_type: u16, value: &str) {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        self.put(attr_type, &data);
    }

    /// Open a nested attribute; returns its offset for `end_nested`
    fn begin_nested(&mut self, attr_type: u16) -> usize {
        let offset = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf.extend_from_slice(&(attr_type | NLA_F_NESTED).to_ne_bytes());
        offset
    }

    fn end_nested(&mut self, offset: usize) {
        let len = self.buf.len() - offset;
        let len = self.attr_len(len);
        self.buf[offset..offset + 2].copy_from_slice(&len.to_ne_bytes());
    }

    pub(super) fn finish(mut self) -> Result<Vec<u8>> {
        if let Some(len) = self.oversized {
            return Err(TransportError::RequestTooLarge { len }.into());
        }
        let len = u32::try_from(self.buf.len()).map_err(|_| TransportError::RequestTooLarge {
            len: self.buf.len(),
        })?;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        Ok(self.buf)
    }
}

/// One decoded netlink message
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Reply<'a> {
    /// Generic netlink payload (attributes after the genl header)
    Data(&'a [u8]),
    /// End of a multi-part dump
    Done,
    /// Acknowledgement (errno 0) or failure (positive errno)
    Error(i32),
}

/// Split a receive buffer into `(seq, reply)` pairs
pub(super) fn parse_replies(mut buf: &[u8]) -> Result<Vec<(u32, Reply<'_>)>> {
    let mut replies = Vec::new();

    while buf.len() >= NLMSG_HDRLEN {
        let len = read_u32(&buf[0..4]) as usize;
        if len < NLMSG_HDRLEN || len > buf.len() {
            return Err(WgCtrlError::malformed(format!(
                "netlink message length {} out of range",
                len
            )));
        }
        let msg_type = read_u16(&buf[4..6]);
        let seq = read_u32(&buf[8..12]);
        let payload = &buf[NLMSG_HDRLEN..len];

        let reply = match msg_type {
            NLMSG_DONE => Reply::Done,
            NLMSG_ERROR => {
                if payload.len() < 4 {
                    return Err(WgCtrlError::malformed("truncated netlink error"));
                }
                // Kernel reports a negative errno
                Reply::Error(-(read_u32(&payload[0..4]) as i32))
            }
            _ => {
                if payload.len() < GENL_HDRLEN {
                    return Err(WgCtrlError::malformed("truncated generic netlink header"));
                }
                Reply::Data(&payload[GENL_HDRLEN..])
            }
        };
        replies.push((seq, reply));

        buf = &buf[align(len).min(buf.len())..];
    }

    Ok(replies)
}

/// One decoded attribute
#[derive(Debug, Clone, Copy)]
struct Attr<'a> {
    attr_type: u16,
    data: &'a [u8],
}

impl<'a> Attr<'a> {
    fn expect_len(&self, len: usize) -> Result<()> {
        if self.data.len() < len {
            return Err(WgCtrlError::malformed(format!(
                "attribute {} has {} bytes, expected {}",
                self.attr_type,
                self.data.len(),
                len
            )));
        }
        Ok(())
    }

    fn u8(&self) -> Result<u8> {
        self.expect_len(1)?;
        Ok(self.data[0])
    }

    fn u16(&self) -> Result<u16> {
        self.expect_len(2)?;
        Ok(read_u16(self.data))
    }

    fn u32(&self) -> Result<u32> {
        self.expect_len(4)?;
        Ok(read_u32(self.data))
    }

    fn u64(&self) -> Result<u64> {
        self.expect_len(8)?;
        Ok(read_u64(self.data))
    }

    fn key(&self) -> Result<Key> {
        Key::from_slice(self.data).map_err(|e| WgCtrlError::malformed(e.to_string()))
    }

    fn nested(&self) -> Result<Vec<Attr<'a>>> {
        parse_attrs(self.data)
    }
}

fn parse_attrs(mut buf: &[u8]) -> Result<Vec<Attr<'_>>> {
    let mut attrs = Vec::new();

    while buf.len() >= NLA_HDRLEN {
        let len = read_u16(&buf[0..2]) as usize;
        if len < NLA_HDRLEN || len > buf.len() {
            return Err(WgCtrlError::malformed(format!(
                "attribute length {} out of range",
                len
            )));
        }
        attrs.push(Attr {
            attr_type: read_u16(&buf[2..4]) & NLA_TYPE_MASK,
            data: &buf[NLA_HDRLEN..len],
        });
        buf = &buf[align(len).min(buf.len())..];
    }

    Ok(attrs)
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_ne_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[0..8]);
    u64::from_ne_bytes(bytes)
}

/// CTRL_CMD_GETFAMILY request for the WireGuard family
pub(super) fn get_family_message(seq: u32) -> Result<Vec<u8>> {
    let mut msg = MessageBuilder::new(
        GENL_ID_CTRL,
        NLM_F_REQUEST | NLM_F_ACK,
        seq,
        CTRL_CMD_GETFAMILY,
        CTRL_VERSION,
    );
    msg.put_str(CTRL_ATTR_FAMILY_NAME, WG_GENL_NAME);
    msg.finish()
}

/// Family id from a CTRL_CMD_GETFAMILY reply payload
pub(super) fn parse_family_id(payload: &[u8]) -> Result<u16> {
    parse_attrs(payload)?
        .iter()
        .find(|a| a.attr_type == CTRL_ATTR_FAMILY_ID)
        .ok_or_else(|| WgCtrlError::malformed("family reply missing id"))?
        .u16()
}

/// WG_CMD_GET_DEVICE dump request for one interface
pub(super) fn get_device_message(family: u16, seq: u32, name: &str) -> Result<Vec<u8>> {
    let mut msg = MessageBuilder::new(
        family,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_DUMP,
        seq,
        WG_CMD_GET_DEVICE,
        WG_GENL_VERSION,
    );
    msg.put_str(WGDEVICE_A_IFNAME, name);
    msg.finish()
}

/// WG_CMD_SET_DEVICE request carrying only the fields present in `config`
///
/// Fails with `RequestTooLarge` when a peer list does not fit in one message.
pub(super) fn set_device_message(
    family: u16,
    seq: u32,
    name: &str,
    config: &Config,
) -> Result<Vec<u8>> {
    let mut msg = MessageBuilder::new(
        family,
        NLM_F_REQUEST | NLM_F_ACK,
        seq,
        WG_CMD_SET_DEVICE,
        WG_GENL_VERSION,
    );
    msg.put_str(WGDEVICE_A_IFNAME, name);

    if let Some(key) = &config.private_key {
        msg.put(WGDEVICE_A_PRIVATE_KEY, key.as_bytes());
    }
    if let Some(port) = config.listen_port {
        msg.put_u16(WGDEVICE_A_LISTEN_PORT, port);
    }
    if let Some(mark) = config.firewall_mark {
        msg.put_u32(WGDEVICE_A_FWMARK, mark);
    }
    if config.replace_peers {
        msg.put_u32(WGDEVICE_A_FLAGS, WGDEVICE_F_REPLACE_PEERS);
    }

    if !config.peers.is_empty() {
        let peers = msg.begin_nested(WGDEVICE_A_PEERS);
        for peer in &config.peers {
            put_peer(&mut msg, peer);
        }
        msg.end_nested(peers);
    }

    msg.finish()
}

fn put_peer(msg: &mut MessageBuilder, peer: &PeerConfig) {
    let nested = msg.begin_nested(0);
    msg.put(WGPEER_A_PUBLIC_KEY, peer.public_key.as_bytes());

    let mut flags = 0;
    if peer.remove {
        flags |= WGPEER_F_REMOVE_ME;
    }
    if peer.update_only {
        flags |= WGPEER_F_UPDATE_ONLY;
    }
    if peer.replace_allowed_ips {
        flags |= WGPEER_F_REPLACE_ALLOWEDIPS;
    }
    if flags != 0 {
        msg.put_u32(WGPEER_A_FLAGS, flags);
    }

    if !peer.remove {
        if let Some(psk) = &peer.preshared_key {
            msg.put(WGPEER_A_PRESHARED_KEY, psk.as_bytes());
        }
        if let Some(endpoint) = peer.endpoint {
            msg.put(WGPEER_A_ENDPOINT, &encode_sockaddr(endpoint));
        }
        if let Some(interval) = peer.persistent_keepalive_interval {
            let secs = interval.as_secs().min(u64::from(u16::MAX)) as u16;
            msg.put_u16(WGPEER_A_PERSISTENT_KEEPALIVE_INTERVAL, secs);
        }
        if !peer.allowed_ips.is_empty() {
            let ips = msg.begin_nested(WGPEER_A_ALLOWEDIPS);
            for ip in &peer.allowed_ips {
                put_allowed_ip(msg, ip);
            }
            msg.end_nested(ips);
        }
    }

    msg.end_nested(nested);
}

fn put_allowed_ip(msg: &mut MessageBuilder, ip: &IpNet) {
    let nested = msg.begin_nested(0);
    match ip.addr() {
        IpAddr::V4(addr) => {
            msg.put_u16(WGALLOWEDIP_A_FAMILY, AF_INET);
            msg.put(WGALLOWEDIP_A_IPADDR, &addr.octets());
        }
        IpAddr::V6(addr) => {
            msg.put_u16(WGALLOWEDIP_A_FAMILY, AF_INET6);
            msg.put(WGALLOWEDIP_A_IPADDR, &addr.octets());
        }
    }
    msg.put_u8(WGALLOWEDIP_A_CIDR_MASK, ip.prefix_len());
    msg.end_nested(nested);
}

/// Assemble a device from the data payloads of one GET_DEVICE dump
///
/// Large devices arrive in several messages; a peer whose public key repeats
/// the previous peer's continues that peer's allowed IPs.
pub(super) fn parse_device(name: &str, payloads: &[Vec<u8>]) -> Result<Device> {
    let mut device = Device::new(name, DeviceType::LinuxKernel);

    for payload in payloads {
        for attr in parse_attrs(payload)? {
            match attr.attr_type {
                WGDEVICE_A_PRIVATE_KEY => device.private_key = attr.key()?,
                WGDEVICE_A_PUBLIC_KEY => device.public_key = Some(attr.key()?),
                WGDEVICE_A_LISTEN_PORT => device.listen_port = attr.u16()?,
                WGDEVICE_A_FWMARK => device.firewall_mark = attr.u32()?,
                WGDEVICE_A_PEERS => {
                    for nested in attr.nested()? {
                        let peer = parse_peer(&nested)?;
                        match device.peers.last_mut() {
                            Some(last) if last.public_key == peer.public_key => {
                                last.allowed_ips.extend(peer.allowed_ips);
                            }
                            _ => device.peers.push(peer),
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(device)
}

fn parse_peer(attr: &Attr<'_>) -> Result<Peer> {
    let mut peer = Peer::new(Key::default());

    for a in attr.nested()? {
        match a.attr_type {
            WGPEER_A_PUBLIC_KEY => peer.public_key = a.key()?,
            WGPEER_A_PRESHARED_KEY => peer.preshared_key = a.key()?,
            WGPEER_A_ENDPOINT => peer.endpoint = parse_sockaddr(a.data)?,
            WGPEER_A_PERSISTENT_KEEPALIVE_INTERVAL => {
                peer.persistent_keepalive_interval = Duration::from_secs(u64::from(a.u16()?));
            }
            WGPEER_A_LAST_HANDSHAKE_TIME => {
                // struct __kernel_timespec { i64 tv_sec; i64 tv_nsec; }
                a.expect_len(16)?;
                let secs = read_u64(&a.data[0..8]);
                let nanos = read_u64(&a.data[8..16]);
                peer.last_handshake_time = handshake_time(secs, nanos)?;
            }
            WGPEER_A_RX_BYTES => peer.receive_bytes = a.u64()?,
            WGPEER_A_TX_BYTES => peer.transmit_bytes = a.u64()?,
            WGPEER_A_ALLOWEDIPS => {
                for ip in a.nested()? {
                    peer.allowed_ips.push(parse_allowed_ip(&ip)?);
                }
            }
            WGPEER_A_PROTOCOL_VERSION => peer.protocol_version = a.u32()?,
            _ => {}
        }
    }

    Ok(peer)
}

fn parse_allowed_ip(attr: &Attr<'_>) -> Result<IpNet> {
    let mut family = None;
    let mut addr: &[u8] = &[];
    let mut cidr = None;

    for a in attr.nested()? {
        match a.attr_type {
            WGALLOWEDIP_A_FAMILY => family = Some(a.u16()?),
            WGALLOWEDIP_A_IPADDR => addr = a.data,
            WGALLOWEDIP_A_CIDR_MASK => cidr = Some(a.u8()?),
            _ => {}
        }
    }

    let ip = match (family, addr.len()) {
        (Some(AF_INET), 4) => IpAddr::V4(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3])),
        (Some(AF_INET6), 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(addr);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(WgCtrlError::malformed("allowed IP with bad family or address")),
    };
    let cidr = cidr.ok_or_else(|| WgCtrlError::malformed("allowed IP missing cidr mask"))?;

    IpNet::new(ip, cidr).map_err(|e| WgCtrlError::malformed(e.to_string()))
}

fn encode_sockaddr(addr: SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut buf = vec![0u8; SOCKADDR_IN_LEN];
            buf[0..2].copy_from_slice(&AF_INET.to_ne_bytes());
            buf[2..4].copy_from_slice(&v4.port().to_be_bytes());
            buf[4..8].copy_from_slice(&v4.ip().octets());
            buf
        }
        SocketAddr::V6(v6) => {
            let mut buf = vec![0u8; SOCKADDR_IN6_LEN];
            buf[0..2].copy_from_slice(&AF_INET6.to_ne_bytes());
            buf[2..4].copy_from_slice(&v6.port().to_be_bytes());
            buf[4..8].copy_from_slice(&v6.flowinfo().to_be_bytes());
            buf[8..24].copy_from_slice(&v6.ip().octets());
            buf[24..28].copy_from_slice(&v6.scope_id().to_ne_bytes());
            buf
        }
    }
}

fn parse_sockaddr(data: &[u8]) -> Result<Option<SocketAddr>> {
    if data.len() < 2 {
        return Err(WgCtrlError::malformed("truncated endpoint"));
    }
    let family = read_u16(&data[0..2]);

    match family {
        AF_INET if data.len() >= SOCKADDR_IN_LEN => {
            let port = u16::from_be_bytes([data[2], data[3]]);
            let ip = Ipv4Addr::new(data[4], data[5], data[6], data[7]);
            Ok(Some(SocketAddr::V4(SocketAddrV4::new(ip, port))))
        }
        AF_INET6 if data.len() >= SOCKADDR_IN6_LEN => {
            let port = u16::from_be_bytes([data[2], data[3]]);
            let flowinfo = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[8..24]);
            let scope_id = read_u32(&data[24..28]);
            Ok(Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flowinfo,
                scope_id,
            ))))
        }
        // Peer without a known endpoint
        0 => Ok(None),
        _ => Err(WgCtrlError::malformed(format!(
            "unsupported endpoint family {}",
            family
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER_KEY_B64: &str = "YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=";

    fn key() -> Key {
        PEER_KEY_B64.parse().unwrap()
    }

    /// A GET_DEVICE reply payload as the kernel would send it
    fn device_payload(peers: &[PeerConfig], listen_port: u16) -> Vec<u8> {
        let mut msg = MessageBuilder::new(21, 0, 1, WG_CMD_GET_DEVICE, WG_GENL_VERSION);
        msg.put_str(WGDEVICE_A_IFNAME, "wg0");
        msg.put(WGDEVICE_A_PUBLIC_KEY, key().as_bytes());
        msg.put_u16(WGDEVICE_A_LISTEN_PORT, listen_port);
        msg.put_u32(WGDEVICE_A_FWMARK, 0x42);
        let nested = msg.begin_nested(WGDEVICE_A_PEERS);
        for peer in peers {
            put_peer(&mut msg, peer);
        }
        msg.end_nested(nested);
        msg.finish().unwrap()[NLMSG_HDRLEN + GENL_HDRLEN..].to_vec()
    }

    fn peer_config(ips: &[&str]) -> PeerConfig {
        let mut peer = PeerConfig::new(key());
        peer.endpoint = Some("[2001:db8::1]:51820".parse().unwrap());
        peer.persistent_keepalive_interval = Some(Duration::from_secs(25));
        peer.allowed_ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        peer
    }

    #[test]
    fn test_message_header() {
        let msg = get_device_message(21, 7, "wg0").unwrap();
        assert_eq!(read_u32(&msg[0..4]) as usize, msg.len());
        assert_eq!(read_u16(&msg[4..6]), 21);
        assert_eq!(read_u16(&msg[6..8]), NLM_F_REQUEST | NLM_F_ACK | NLM_F_DUMP);
        assert_eq!(read_u32(&msg[8..12]), 7);
        assert_eq!(msg[16], WG_CMD_GET_DEVICE);
        assert_eq!(msg.len() % 4, 0);

        let attrs = parse_attrs(&msg[NLMSG_HDRLEN + GENL_HDRLEN..]).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].attr_type, WGDEVICE_A_IFNAME);
        assert_eq!(attrs[0].data, b"wg0\0");
    }

    #[test]
    fn test_parse_device() {
        let payload = device_payload(&[peer_config(&["10.0.0.0/24", "fd00::/64"])], 51820);
        let device = parse_device("wg0", &[payload]).unwrap();

        assert_eq!(device.device_type, DeviceType::LinuxKernel);
        assert_eq!(device.public_key, Some(key()));
        assert_eq!(device.listen_port, 51820);
        assert_eq!(device.firewall_mark, 0x42);

        assert_eq!(device.peers.len(), 1);
        let peer = &device.peers[0];
        assert_eq!(peer.public_key, key());
        assert_eq!(peer.endpoint.unwrap().to_string(), "[2001:db8::1]:51820");
        assert_eq!(peer.persistent_keepalive_interval, Duration::from_secs(25));
        assert_eq!(peer.allowed_ips.len(), 2);
        assert_eq!(peer.allowed_ips[0].to_string(), "10.0.0.0/24");
        assert_eq!(peer.allowed_ips[1].to_string(), "fd00::/64");
    }

    #[test]
    fn test_split_peer_is_merged() {
        let first = device_payload(&[peer_config(&["10.0.0.0/24"])], 51820);
        let second = device_payload(&[peer_config(&["10.0.1.0/24"])], 51820);

        let device = parse_device("wg0", &[first, second]).unwrap();
        assert_eq!(device.peers.len(), 1);
        assert_eq!(device.peers[0].allowed_ips.len(), 2);
    }

    #[test]
    fn test_parse_replies() {
        let mut buf = Vec::new();

        // data message
        let mut data = MessageBuilder::new(21, 0, 3, WG_CMD_GET_DEVICE, WG_GENL_VERSION);
        data.put_u16(WGDEVICE_A_LISTEN_PORT, 1);
        buf.extend_from_slice(&data.finish().unwrap());

        // error message carrying -ENODEV (19)
        let mut err = Vec::new();
        err.extend_from_slice(&(NLMSG_HDRLEN as u32 + 4).to_ne_bytes());
        err.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        err.extend_from_slice(&0u16.to_ne_bytes());
        err.extend_from_slice(&3u32.to_ne_bytes());
        err.extend_from_slice(&0u32.to_ne_bytes());
        err.extend_from_slice(&(-19i32).to_ne_bytes());
        buf.extend_from_slice(&err);

        let replies = parse_replies(&buf).unwrap();
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], (3, Reply::Data(_))));
        assert_eq!(replies[1], (3, Reply::Error(19)));
    }

    #[test]
    fn test_truncated_message_is_malformed() {
        let msg = get_family_message(1).unwrap();
        assert!(parse_replies(&msg[..msg.len() - 4]).is_err());
    }

    #[test]
    fn test_family_id() {
        let mut msg = MessageBuilder::new(GENL_ID_CTRL, 0, 1, CTRL_CMD_GETFAMILY, CTRL_VERSION);
        msg.put_str(CTRL_ATTR_FAMILY_NAME, WG_GENL_NAME);
        msg.put_u16(CTRL_ATTR_FAMILY_ID, 27);
        let payload = msg.finish().unwrap()[NLMSG_HDRLEN + GENL_HDRLEN..].to_vec();

        assert_eq!(parse_family_id(&payload).unwrap(), 27);
    }

    #[test]
    fn test_set_device_remove_peer_sends_only_flags() {
        let mut peer = peer_config(&["10.0.0.0/24"]);
        peer.remove = true;
        let config = Config {
            listen_port: Some(51821),
            peers: vec![peer],
            ..Config::default()
        };

        let msg = set_device_message(21, 1, "wg0", &config).unwrap();
        let attrs = parse_attrs(&msg[NLMSG_HDRLEN + GENL_HDRLEN..]).unwrap();
        let types: Vec<u16> = attrs.iter().map(|a| a.attr_type).collect();
        assert_eq!(
            types,
            vec![WGDEVICE_A_IFNAME, WGDEVICE_A_LISTEN_PORT, WGDEVICE_A_PEERS]
        );

        let peers = attrs[2].nested().unwrap();
        let peer_attrs = peers[0].nested().unwrap();
        assert_eq!(peer_attrs.len(), 2);
        assert_eq!(peer_attrs[1].u32().unwrap(), WGPEER_F_REMOVE_ME);
    }

    #[test]
    fn test_set_device_rejects_oversized_peer() {
        let ips: Vec<String> = (0..3000).map(|i| format!("2001:db8:{:x}::/64", i)).collect();
        let ips: Vec<&str> = ips.iter().map(String::as_str).collect();

        // 1000 allowed IPs still fit in one attribute
        let config = Config {
            peers: vec![peer_config(&ips[..1000])],
            ..Config::default()
        };
        let msg = set_device_message(21, 1, "wg0", &config).unwrap();
        let attrs = parse_attrs(&msg[NLMSG_HDRLEN + GENL_HDRLEN..]).unwrap();
        let peers = attrs[1].nested().unwrap();
        let allowed = peers[0]
            .nested()
            .unwrap()
            .into_iter()
            .find(|a| a.attr_type == WGPEER_A_ALLOWEDIPS)
            .unwrap();
        assert_eq!(allowed.nested().unwrap().len(), 1000);

        let config = Config {
            peers: vec![peer_config(&ips)],
            ..Config::default()
        };
        let err = set_device_message(21, 1, "wg0", &config).unwrap_err();
        match &err {
            WgCtrlError::Transport(TransportError::RequestTooLarge { len }) => {
                assert!(*len > usize::from(u16::MAX));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_sockaddr_v4() {
        let addr: SocketAddr = "192.0.2.1:51820".parse().unwrap();
        let encoded = encode_sockaddr(addr);
        assert_eq!(encoded.len(), SOCKADDR_IN_LEN);
        assert_eq!(&encoded[2..4], &51820u16.to_be_bytes());
        assert_eq!(parse_sockaddr(&encoded).unwrap(), Some(addr));
        assert_eq!(parse_sockaddr(&[0u8; SOCKADDR_IN_LEN]).unwrap(), None);
    }
}
