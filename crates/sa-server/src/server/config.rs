use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Command line of the `sa-server` binary.
///
/// Everything except the two listen addresses lives in the JSON file named by
/// `--config`. The address flags exist so the same file can be shared between
/// instances running side by side.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sa-server",
    version,
    about = "gRPC host for the storage authority"
)]
pub struct CliArgs {
    /// File path to the configuration file for this service.
    ///
    /// Environment variable: `SA_CONFIG`
    #[arg(long, env = "SA_CONFIG")]
    pub config: Option<PathBuf>,

    /// gRPC listen address override.
    ///
    /// Environment variable: `SA_GRPC_ADDR`
    #[arg(long, env = "SA_GRPC_ADDR")]
    pub grpc_addr: Option<String>,

    /// Debug server address override.
    ///
    /// Environment variable: `SA_DEBUG_ADDR`
    #[arg(long, env = "SA_DEBUG_ADDR")]
    pub debug_addr: Option<String>,
}

/// On-disk layout of the configuration file.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub sa: SaSection,
    #[serde(default)]
    pub syslog: SyslogConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaSection {
    #[serde(default)]
    pub debug_addr: String,
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    pub db: DbConfig,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    /// Max simultaneous SQL queries caused by a single RPC.
    #[serde(default)]
    pub parallelism_per_rpc: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrpcConfig {
    /// Listen address, `host:port` or `:port` for all interfaces.
    pub address: String,
    /// Close client connections after this many seconds so load rebalances.
    #[serde(default)]
    pub max_connection_age_secs: Option<u64>,
    /// Per-request deadline enforced by the server.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// When set, clients must present a certificate signed by this CA.
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DbConfig {
    /// Connection string, inline.
    #[serde(default)]
    pub db_connect: Option<String>,
    /// File holding the connection string, for deployments that mount
    /// credentials as secrets.
    #[serde(default)]
    pub db_connect_file: Option<PathBuf>,
    /// Maximum open connections; `0` selects the pool default.
    #[serde(default)]
    pub max_db_conns: u32,
    /// Maximum idle connections; `0` leaves the pool default untouched.
    #[serde(default)]
    pub max_idle_db_conns: u32,
}

impl DbConfig {
    /// Resolves the database connection string.
    ///
    /// Exactly one of `dbConnect` and `dbConnectFile` must be set. File
    /// contents are trimmed.
    pub fn url(&self) -> anyhow::Result<String> {
        match (&self.db_connect, &self.db_connect_file) {
            (Some(_), Some(_)) => bail!("dbConnect and dbConnectFile are mutually exclusive"),
            (Some(url), None) => Ok(url.clone()),
            (None, Some(path)) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let url = contents.trim();
                if url.is_empty() {
                    bail!("{} is empty", path.display());
                }
                Ok(url.to_string())
            }
            (None, None) => bail!("one of dbConnect or dbConnectFile is required"),
        }
    }
}

/// Log output settings. Levels use syslog numbering.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyslogConfig {
    #[serde(default = "default_stdout_level")]
    pub stdout_level: u8,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

const fn default_stdout_level() -> u8 {
    6
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            stdout_level: default_stdout_level(),
            json: false,
        }
    }
}

/// Fully resolved configuration, with command line overrides applied.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub grpc: GrpcConfig,
    /// `None` disables the debug server.
    pub debug_addr: Option<String>,
    pub tls: Option<TlsConfig>,
    pub db: DbConfig,
    pub features: BTreeMap<String, bool>,
    pub parallelism_per_rpc: i64,
    pub syslog: SyslogConfig,
}

impl ServerConfig {
    /// Reads and parses the configuration file at `path`.
    pub fn read_file(path: &Path) -> anyhow::Result<ConfigFile> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Applies command line overrides on top of a parsed file.
    pub fn from_file(file: ConfigFile, grpc_addr: Option<String>, debug_addr: Option<String>) -> Self {
        let ConfigFile { sa, syslog } = file;

        let mut grpc = sa.grpc;
        if let Some(addr) = grpc_addr.filter(|addr| !addr.is_empty()) {
            grpc.address = addr;
        }
        grpc.address = normalize_addr(&grpc.address);

        let debug_addr = debug_addr
            .filter(|addr| !addr.is_empty())
            .or(Some(sa.debug_addr).filter(|addr| !addr.is_empty()))
            .map(|addr| normalize_addr(&addr));

        Self {
            grpc,
            debug_addr,
            tls: sa.tls,
            db: sa.db,
            features: sa.features,
            parallelism_per_rpc: sa.parallelism_per_rpc,
            syslog,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Some(path) = args.config else {
            bail!("--config is required");
        };
        let file = Self::read_file(&path)?;
        Ok(Self::from_file(file, args.grpc_addr, args.debug_addr))
    }
}

/// Expands `:port` to `0.0.0.0:port`; other addresses pass through.
pub fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests;
