//! Device, peer and configuration types shared by all backends
//!
//! These are passed through the client untouched; only the backends read or
//! fill them in.

mod config;
mod device;
mod key;

pub use config::{Config, PeerConfig};
pub(crate) use device::handshake_time;
pub use device::{Device, DeviceType, Peer};
pub use key::{Key, ParseKeyError, KEY_LEN};
