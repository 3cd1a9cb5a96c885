//! wgctrl - WireGuard device control
//!
//! Enumerate and configure WireGuard devices on a host without caring which
//! mechanism exposes them.
//!
//! # Features
//!
//! - Linux kernel devices over generic netlink
//! - Userspace daemons (wireguard-go, boringtun) over their UAPI sockets
//! - Kernel devices listed first and preferred on name clashes
//! - "No such device" reported distinctly from every other failure
//!
//! # Usage
//!
//! ```no_run
//! use wgctrl::{Client, Config};
//!
//! fn main() -> Result<(), wgctrl::WgCtrlError> {
//!     let client = Client::new()?;
//!     for device in client.devices()? {
//!         println!("{} ({})", device.name, device.device_type);
//!     }
//!
//!     let config = Config {
//!         listen_port: Some(51820),
//!         ..Config::default()
//!     };
//!     match client.configure_device("wg0", &config) {
//!         Err(e) if e.is_not_found() => println!("wg0 does not exist"),
//!         other => other?,
//!     }
//!
//!     client.close()
//! }
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod types;

pub use backend::{Backend, BackendFactory, BackendKind, HostProbe, OsProbe};
pub use client::{Client, ClientOptions, ReleasePolicy};
pub use error::{TransportError, WgCtrlError};
pub use types::{Config, Device, DeviceType, Key, Peer, PeerConfig};
