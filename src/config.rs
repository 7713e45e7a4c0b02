use std::fs::read_to_string;
use std::net::SocketAddr;

use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostSelection {
    Any,
    Signed,
    RoundRobin,
}

impl Default for HostSelection {
    fn default() -> Self {
        Self::Any
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Authorizer {
    /// require PAA token verification at `TUNNEL_CREATE`.
    #[serde(default)]
    pub token_auth: bool,

    /// require the client IP observed by the transport to match the PAA
    /// token's embedded `client_ip`.
    #[serde(default)]
    pub verify_client_ip: bool,

    /// shared secret used by [`crate::authorizer::StaticPaaVerifier`] to
    /// check the PAA envelope's HMAC. A stand-in for the real PAA
    /// issuer/verifier, which is an external collaborator.
    #[serde(default = "Authorizer::hmac_key")]
    pub hmac_key: String,

    #[serde(default)]
    pub host_selection: HostSelection,

    /// candidate backends `select_host` may return. Required and exhaustive
    /// when `host_selection` is `round_robin`; otherwise an allow-list.
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Authorizer {
    fn hmac_key() -> String {
        "change-me".to_string()
    }
}

impl Default for Authorizer {
    fn default() -> Self {
        Self {
            token_auth: false,
            verify_client_ip: false,
            hmac_key: Self::hmac_key(),
            host_selection: HostSelection::default(),
            hosts: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RedirectFlags {
    #[serde(default)]
    pub disable_drive: bool,
    #[serde(default)]
    pub disable_printer: bool,
    #[serde(default)]
    pub disable_port: bool,
    #[serde(default)]
    pub disable_clipboard: bool,
    #[serde(default)]
    pub disable_pnp: bool,
    #[serde(default)]
    pub enable_all: bool,
    #[serde(default)]
    pub disable_all: bool,
}

impl From<&RedirectFlags> for codec::caps::RedirectFlags {
    fn from(flags: &RedirectFlags) -> Self {
        let mut out = codec::caps::RedirectFlags::default();
        if flags.disable_drive {
            out.set(codec::caps::RedirectFlags::DISABLE_DRIVE);
        }
        if flags.disable_printer {
            out.set(codec::caps::RedirectFlags::DISABLE_PRINTER);
        }
        if flags.disable_port {
            out.set(codec::caps::RedirectFlags::DISABLE_PORT);
        }
        if flags.disable_clipboard {
            out.set(codec::caps::RedirectFlags::DISABLE_CLIPBOARD);
        }
        if flags.disable_pnp {
            out.set(codec::caps::RedirectFlags::DISABLE_PNP);
        }
        if flags.enable_all {
            out.set(codec::caps::RedirectFlags::ENABLE_ALL);
        }
        if flags.disable_all {
            out.set(codec::caps::RedirectFlags::DISABLE_ALL);
        }
        out
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Gateway {
    /// HTTP listen address for `POST /remoteDesktopGateway/` and friends.
    #[serde(default = "Gateway::listen")]
    pub listen: SocketAddr,

    /// closes `OPENED` sessions after this many seconds of inactivity. `0`
    /// disables idle timeout.
    #[serde(default)]
    pub idle_timeout: u32,

    /// advertise `SC` in the extended-auth mask.
    #[serde(default)]
    pub smart_card_auth: bool,

    /// advertise and honor `REAUTH_MESSAGE`.
    #[serde(default = "Gateway::enable_reauth")]
    pub enable_reauth: bool,

    #[serde(default)]
    pub redirect_flags: RedirectFlags,

    /// backend pump buffer sizes, in bytes.
    #[serde(default = "Gateway::send_buf")]
    pub send_buf: usize,
    #[serde(default = "Gateway::send_buf")]
    pub receive_buf: usize,

    /// HTTP dual-channel correlation pairing window, in seconds.
    #[serde(default = "Gateway::pairing_timeout")]
    pub pairing_timeout: u64,
}

impl Gateway {
    fn listen() -> SocketAddr {
        "127.0.0.1:8443".parse().unwrap()
    }

    fn enable_reauth() -> bool {
        true
    }

    fn send_buf() -> usize {
        64 * 1024
    }

    fn pairing_timeout() -> u64 {
        5
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            idle_timeout: 0,
            smart_card_auth: false,
            enable_reauth: Self::enable_reauth(),
            redirect_flags: RedirectFlags::default(),
            send_buf: Self::send_buf(),
            receive_buf: Self::send_buf(),
            pairing_timeout: Self::pairing_timeout(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default)]
pub struct Metrics {
    /// bind address for `GET /metrics`. Unset disables the route even when
    /// the `metrics` feature is compiled in.
    pub listen: Option<SocketAddr>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub gateway: Gateway,
    #[serde(default)]
    pub authorizer: Authorizer,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
struct Cli {
    /// path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Loads command line parameters; if a configuration file path is
    /// given, reads configuration from it, otherwise falls back to
    /// defaults for every field.
    pub fn load() -> anyhow::Result<Self> {
        let cfg_str = Cli::parse()
            .config
            .map(|path| read_to_string(path))
            .transpose()?
            .unwrap_or_default();

        Ok(toml::from_str(&cfg_str)?)
    }
}
