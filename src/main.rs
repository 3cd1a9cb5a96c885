//! wgctrl CLI - inspect and configure WireGuard devices
//!
//! Works the same whether a device is backed by the Linux kernel module or a
//! userspace daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use wgctrl::{Client, ClientOptions, Config, Device, WgCtrlError};

/// wgctrl - WireGuard device control
#[derive(Parser, Debug)]
#[command(name = "wgctrl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding userspace daemon sockets (default: /var/run/wireguard)
    #[arg(long, global = true, value_name = "DIR")]
    socket_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one device, or all devices
    Show {
        /// Interface name
        interface: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Change settings of one device
    Set {
        /// Interface name
        interface: String,

        /// UDP listen port
        #[arg(long)]
        listen_port: Option<u16>,

        /// Firewall mark for outgoing packets (0 clears it)
        #[arg(long)]
        fwmark: Option<u32>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(args: Args) -> Result<(), WgCtrlError> {
    let mut options = ClientOptions::default();
    if let Some(dir) = args.socket_dir {
        options = options.socket_dir(dir);
    }

    let client = Client::with_options(options)?;
    tracing::debug!("Using backends: {:?}", client.backend_kinds());

    let result = execute(&client, args.command);
    let closed = client.close();
    // A command error is more useful than a close error
    result.and(closed)
}

fn execute(client: &Client, command: Command) -> Result<(), WgCtrlError> {
    match command {
        Command::Show { interface, json } => {
            let devices = match interface {
                Some(name) => vec![client.device(&name)?],
                None => client.devices()?,
            };

            if json {
                let out = serde_json::to_string_pretty(&devices).map_err(|e| {
                    WgCtrlError::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                })?;
                println!("{}", out);
            } else {
                let blocks: Vec<String> = devices.iter().map(format_device).collect();
                print!("{}", blocks.join("\n"));
            }
            Ok(())
        }
        Command::Set {
            interface,
            listen_port,
            fwmark,
        } => {
            let config = Config {
                listen_port,
                firewall_mark: fwmark,
                ..Config::default()
            };
            if config.is_empty() {
                tracing::info!("Nothing to change on {}", interface);
                return Ok(());
            }
            client.configure_device(&interface, &config)?;
            tracing::info!("Updated {}", interface);
            Ok(())
        }
    }
}

/// Render a device the way wg(8) shows it
fn format_device(device: &Device) -> String {
    let mut out = String::new();
    out.push_str(&format!("interface: {} ({})\n", device.name, device.device_type));
    if let Some(key) = &device.public_key {
        out.push_str(&format!("  public key: {}\n", key));
    }
    if !device.private_key.is_zero() {
        out.push_str("  private key: (hidden)\n");
    }
    if device.listen_port != 0 {
        out.push_str(&format!("  listening port: {}\n", device.listen_port));
    }
    if device.firewall_mark != 0 {
        out.push_str(&format!("  fwmark: {:#x}\n", device.firewall_mark));
    }

    for peer in &device.peers {
        out.push_str(&format!("\npeer: {}\n", peer.public_key));
        if !peer.preshared_key.is_zero() {
            out.push_str("  preshared key: (hidden)\n");
        }
        if let Some(endpoint) = peer.endpoint {
            out.push_str(&format!("  endpoint: {}\n", endpoint));
        }
        let allowed: Vec<String> = peer.allowed_ips.iter().map(|ip| ip.to_string()).collect();
        let allowed = if allowed.is_empty() {
            "(none)".to_string()
        } else {
            allowed.join(", ")
        };
        out.push_str(&format!("  allowed ips: {}\n", allowed));
        if let Some(at) = peer.last_handshake_time {
            let ago = SystemTime::now()
                .duration_since(at)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            out.push_str(&format!("  latest handshake: {} seconds ago\n", ago));
        }
        if peer.receive_bytes != 0 || peer.transmit_bytes != 0 {
            out.push_str(&format!(
                "  transfer: {} B received, {} B sent\n",
                peer.receive_bytes, peer.transmit_bytes
            ));
        }
        if !peer.persistent_keepalive_interval.is_zero() {
            out.push_str(&format!(
                "  persistent keepalive: every {} seconds\n",
                peer.persistent_keepalive_interval.as_secs()
            ));
        }
    }

    out
}
