//! Configuration management
//!
//! The configuration is loaded once at startup and treated as read-only by
//! the core; connect blocks authorise server links in either direction.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local server identity
    pub server: ServerConfig,
    /// Listening sockets
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    /// TLS material for TLS-enabled listeners
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Numeric limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Defaults applied to freshly registered users
    #[serde(default)]
    pub users: UserDefaults,
    /// Connect blocks authorising server links
    #[serde(default)]
    pub links: Vec<ConnectBlock>,
    /// Operator blocks
    #[serde(default)]
    pub operators: Vec<OperatorBlock>,
    /// MOTD file path
    #[serde(default)]
    pub motd_file: Option<String>,
}

/// Local server identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name (irc.example.org)
    pub name: String,
    /// 3-character server ID
    pub sid: String,
    /// Server description
    pub description: String,
    /// Network name advertised in ISUPPORT
    pub network: String,
}

/// One listening socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port
    pub port: u16,
    /// Accept TLS on this port
    #[serde(default)]
    pub tls: bool,
    /// What this port accepts
    #[serde(default)]
    pub kind: ListenerKind,
}

/// What kind of peer a listener accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListenerKind {
    #[default]
    Client,
    Server,
}

/// TLS certificate material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

/// Numeric limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum local clients; 0 disables the cap
    #[serde(default)]
    pub max_clients: usize,
    /// Maximum nickname length
    #[serde(default = "default_nick_len")]
    pub max_nick_length: usize,
    /// Mode letters per MODE line toward clients
    #[serde(default = "default_modes_per_line")]
    pub max_modes_per_line: usize,
    /// Mode letters per MODE line toward servers
    #[serde(default = "default_modes_per_sline")]
    pub max_modes_per_sline: usize,
    /// Seconds of silence before a connection is pinged
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Seconds after an unanswered ping before the connection is dropped
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: 0,
            max_nick_length: default_nick_len(),
            max_modes_per_line: default_modes_per_line(),
            max_modes_per_sline: default_modes_per_sline(),
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
        }
    }
}

/// Defaults applied to freshly registered users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefaults {
    /// Mode string applied at welcome, e.g. "+i"
    #[serde(default = "default_automodes")]
    pub automodes: String,
    /// Emulate CHGHOST with QUIT/JOIN toward clients lacking the capability
    #[serde(default = "default_true")]
    pub chghost_emulation: bool,
    /// Visible quit reason used when this server's users are disconnected by
    /// a netsplit
    #[serde(default = "default_split_reason")]
    pub split_quit_reason: String,
}

impl Default for UserDefaults {
    fn default() -> Self {
        Self {
            automodes: default_automodes(),
            chghost_emulation: true,
            split_quit_reason: default_split_reason(),
        }
    }
}

/// One connect block authorising a server link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectBlock {
    /// Remote server name
    pub name: String,
    /// Expected remote address
    pub address: String,
    /// Port for outgoing attempts
    #[serde(default)]
    pub port: Option<u16>,
    /// Digest algorithm for the password exchange (sha256 or sha512)
    #[serde(default = "default_encryption")]
    pub encryption: String,
    /// Plaintext password we send (digested before transmission)
    pub send_password: String,
    /// Digest we expect from the peer
    pub receive_password: String,
    /// Attempt an outgoing connection at startup
    #[serde(default)]
    pub autoconnect: bool,
}

/// One operator block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorBlock {
    /// Oper login name
    pub name: String,
    /// Argon2 password hash (see the mkpasswd tool)
    pub password_hash: String,
    /// user@host pattern that may use this block
    #[serde(default = "default_hostmask")]
    pub hostmask: String,
    /// Oper flags granted; "all" is a wildcard
    #[serde(default)]
    pub flags: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_nick_len() -> usize {
    30
}
fn default_modes_per_line() -> usize {
    4
}
fn default_modes_per_sline() -> usize {
    10
}
fn default_ping_interval() -> u64 {
    90
}
fn default_ping_timeout() -> u64 {
    120
}
fn default_automodes() -> String {
    "+i".to_string()
}
fn default_true() -> bool {
    true
}
fn default_split_reason() -> String {
    "*.net *.split".to_string()
}
fn default_encryption() -> String {
    "sha256".to_string()
}
fn default_hostmask() -> String {
    "*@*".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate invariants the rest of the core relies on
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() {
            return Err(Error::Config("server.name must not be empty".to_string()));
        }
        if !crate::utils::is_valid_sid(&self.server.sid) {
            return Err(Error::Config(format!(
                "server.sid {:?} is not a valid SID",
                self.server.sid
            )));
        }
        for link in &self.links {
            if link.name.is_empty() || link.receive_password.is_empty() {
                return Err(Error::Config(format!(
                    "connect block {:?} is incomplete",
                    link.name
                )));
            }
            crate::utils::digest(&link.encryption, "")?;
        }
        for listener in &self.listeners {
            if listener.tls && self.tls.is_none() {
                return Err(Error::Config(format!(
                    "listener on port {} wants TLS but no [tls] section is configured",
                    listener.port
                )));
            }
        }
        Ok(())
    }

    /// Look up the connect block for a server name, case-insensitively
    pub fn connect_block(&self, name: &str) -> Option<&ConnectBlock> {
        let folded = crate::utils::fold(name);
        self.links
            .iter()
            .find(|l| crate::utils::fold(&l.name) == folded)
    }

    /// Look up an operator block by login name
    pub fn operator_block(&self, name: &str) -> Option<&OperatorBlock> {
        self.operators.iter().find(|o| o.name == name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "irc.example.org".to_string(),
                sid: "0AA".to_string(),
                description: "ironircd server".to_string(),
                network: "ExampleNet".to_string(),
            },
            listeners: vec![ListenerConfig {
                bind: default_bind(),
                port: 6667,
                tls: false,
                kind: ListenerKind::Client,
            }],
            tls: None,
            limits: LimitsConfig::default(),
            users: UserDefaults::default(),
            links: Vec::new(),
            operators: Vec::new(),
            motd_file: None,
        }
    }
}
