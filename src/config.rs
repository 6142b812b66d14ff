//! Exporter configuration
//!
//! Settings are layered, lowest precedence first:
//!
//! ```text
//!  target defaults ──▶ TOML file (--config / EXPORTER_CONFIG) ──▶ flags / env
//! ```
//!
//! Example file:
//!
//! ```toml
//! listen_address = ":9077"
//! metrics_path = "/metrics"
//! timeout_secs = 10
//!
//! [datanode]
//! jmx_url = "http://dn01:50075/jmx"
//!
//! [zookeeper]
//! host = "zk01"
//! port = 2181
//! refresh = "every-scrape"
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ingestion::mntr::{RefreshPolicy, DEFAULT_PORT};
use crate::mapping::DeploymentTarget;
use crate::server::HEALTH_PATH;

/// Default path of the exposition endpoint
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Default bound on a single upstream fetch or query
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Command line
// ============================================================================

/// Command line of the exporter binary
#[derive(Debug, Parser)]
#[command(name = "hadoop-exporter", version, about = "Prometheus exporter for HDFS and ZooKeeper")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "EXPORTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Address to listen on for web interface and telemetry
    #[arg(long = "web.listen-address", env = "EXPORTER_LISTEN_ADDRESS", global = true)]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", env = "EXPORTER_TELEMETRY_PATH", global = true)]
    pub telemetry_path: Option<String>,

    /// Upstream fetch timeout in seconds
    #[arg(long = "upstream.timeout-secs", env = "EXPORTER_UPSTREAM_TIMEOUT", global = true)]
    pub timeout_secs: Option<u64>,

    /// Deployment target
    #[command(subcommand)]
    pub target: TargetCommand,
}

/// Per-target flags
#[derive(Debug, Clone, Subcommand)]
pub enum TargetCommand {
    /// Export HDFS DataNode metrics
    Datanode {
        /// HDFS DataNode JMX URL
        #[arg(long = "datanode.jmx.url", env = "DATANODE_JMX_URL")]
        jmx_url: Option<String>,
    },
    /// Export HDFS NameNode metrics
    Namenode {
        /// HDFS NameNode JMX URL
        #[arg(long = "namenode.jmx.url", env = "NAMENODE_JMX_URL")]
        jmx_url: Option<String>,
    },
    /// Export ZooKeeper mntr metrics
    Zookeeper {
        /// ZooKeeper host
        #[arg(long = "zookeeper-host", env = "ZOOKEEPER_HOST")]
        host: Option<String>,
        /// ZooKeeper client port
        #[arg(long = "zookeeper.port", env = "ZOOKEEPER_PORT")]
        port: Option<u16>,
        /// Shell command printing the mntr reply instead of a direct query
        #[arg(long = "zookeeper.command", env = "ZOOKEEPER_COMMAND")]
        command: Option<String>,
        /// Query through `echo mntr | nc <host> <port>`
        #[arg(long = "zookeeper.netcat", env = "ZOOKEEPER_NETCAT")]
        netcat: bool,
        /// When to re-run the mntr query
        #[arg(long = "zookeeper.refresh", env = "ZOOKEEPER_REFRESH", value_enum)]
        refresh: Option<RefreshPolicy>,
    },
}

impl TargetCommand {
    /// Deployment target selected by the subcommand
    pub fn target(&self) -> DeploymentTarget {
        match self {
            TargetCommand::Datanode { .. } => DeploymentTarget::DataNode,
            TargetCommand::Namenode { .. } => DeploymentTarget::NameNode,
            TargetCommand::Zookeeper { .. } => DeploymentTarget::ZooKeeper,
        }
    }
}

// ============================================================================
// File
// ============================================================================

/// Configuration file contents; every setting is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Listen address, `host:port` or `:port`
    #[serde(default)]
    pub listen_address: Option<String>,

    /// Exposition path
    #[serde(default)]
    pub metrics_path: Option<String>,

    /// Upstream timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// DataNode settings
    #[serde(default)]
    pub datanode: JmxSection,

    /// NameNode settings
    #[serde(default)]
    pub namenode: JmxSection,

    /// ZooKeeper settings
    #[serde(default)]
    pub zookeeper: ZooKeeperSection,
}

/// `[datanode]` / `[namenode]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JmxSection {
    /// JMX servlet URL
    #[serde(default)]
    pub jmx_url: Option<String>,
}

/// `[zookeeper]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZooKeeperSection {
    /// Server host
    #[serde(default)]
    pub host: Option<String>,
    /// Client port
    #[serde(default)]
    pub port: Option<u16>,
    /// Shell command replacing the direct query
    #[serde(default)]
    pub command: Option<String>,
    /// Query through netcat
    #[serde(default)]
    pub netcat: Option<bool>,
    /// Refresh policy
    #[serde(default)]
    pub refresh: Option<RefreshPolicy>,
}

impl FileConfig {
    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "Loaded configuration from file");
        Ok(config)
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// How the mntr reply is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MntrQuery {
    /// Four-letter word over a direct TCP connection
    Socket,
    /// `echo mntr | nc <host> <port>`
    Netcat,
    /// Arbitrary shell command
    Command(String),
}

/// Where the metrics come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamConfig {
    /// JMX servlet fetched over HTTP
    Jmx {
        /// Servlet URL
        url: String,
    },
    /// ZooKeeper `mntr` query
    Mntr {
        /// Server host
        host: String,
        /// Client port
        port: u16,
        /// Query method
        query: MntrQuery,
        /// Refresh policy
        refresh: RefreshPolicy,
    },
}

/// Fully resolved exporter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    /// Deployment target
    pub target: DeploymentTarget,
    /// HTTP listen address
    pub listen_address: SocketAddr,
    /// Exposition path
    pub metrics_path: String,
    /// Bound on a single upstream fetch or query
    pub upstream_timeout: Duration,
    /// Upstream source
    pub upstream: UpstreamConfig,
}

impl ExporterConfig {
    /// Resolve the configuration from the command line and its optional file
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(cli, &file)
    }

    /// Merge target defaults, file settings and command-line flags
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self> {
        let target = cli.target.target();

        let listen_address = cli
            .listen_address
            .as_deref()
            .or(file.listen_address.as_deref())
            .unwrap_or(target.default_listen_address());

        let metrics_path = cli
            .telemetry_path
            .as_deref()
            .or(file.metrics_path.as_deref())
            .unwrap_or(DEFAULT_METRICS_PATH);

        let timeout_secs = cli
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(Error::Configuration(
                "upstream timeout must be at least one second".to_string(),
            ));
        }

        let upstream = match &cli.target {
            TargetCommand::Datanode { jmx_url } => UpstreamConfig::Jmx {
                url: pick(jmx_url, &file.datanode.jmx_url, target.default_upstream()),
            },
            TargetCommand::Namenode { jmx_url } => UpstreamConfig::Jmx {
                url: pick(jmx_url, &file.namenode.jmx_url, target.default_upstream()),
            },
            TargetCommand::Zookeeper {
                host,
                port,
                command,
                netcat,
                refresh,
            } => {
                let section = &file.zookeeper;
                let query = match command.clone().or_else(|| section.command.clone()) {
                    Some(command) => MntrQuery::Command(command),
                    None if *netcat || section.netcat == Some(true) => MntrQuery::Netcat,
                    None => MntrQuery::Socket,
                };
                UpstreamConfig::Mntr {
                    host: pick(host, &section.host, target.default_upstream()),
                    port: port.or(section.port).unwrap_or(DEFAULT_PORT),
                    query,
                    refresh: refresh.or(section.refresh).unwrap_or_default(),
                }
            }
        };

        Ok(Self {
            target,
            listen_address: parse_listen_address(listen_address)?,
            metrics_path: validate_metrics_path(metrics_path)?,
            upstream_timeout: Duration::from_secs(timeout_secs),
            upstream,
        })
    }
}

fn pick(flag: &Option<String>, file: &Option<String>, default: &str) -> String {
    flag.clone()
        .or_else(|| file.clone())
        .unwrap_or_else(|| default.to_string())
}

/// Parse a listen address; `:9077` binds every interface
pub fn parse_listen_address(addr: &str) -> Result<SocketAddr> {
    let addr = addr.trim();
    let full = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    };

    if let Ok(parsed) = full.parse::<SocketAddr>() {
        return Ok(parsed);
    }
    full.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::Configuration(format!("invalid listen address: {}", addr)))
}

/// Check an exposition path: absolute, literal and not taken by another route
pub fn validate_metrics_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::Configuration(format!(
            "metrics path must start with '/': {}",
            path
        )));
    }
    // the router reads these as parameters or wildcards
    if path.contains([':', '*', '{', '}']) {
        return Err(Error::Configuration(format!(
            "metrics path cannot contain ':', '*', '{{' or '}}': {}",
            path
        )));
    }
    if path == "/" {
        return Err(Error::Configuration(
            "metrics path cannot be '/', which serves the landing page".to_string(),
        ));
    }
    if path == HEALTH_PATH {
        return Err(Error::Configuration(format!(
            "metrics path cannot be {}",
            HEALTH_PATH
        )));
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["hadoop-exporter"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_listen_address() {
        assert_eq!(
            parse_listen_address(":9077").unwrap(),
            "0.0.0.0:9077".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_address("127.0.0.1:9070").unwrap(),
            "127.0.0.1:9070".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_listen_address("not an address").is_err());
        assert!(parse_listen_address(":notaport").is_err());
    }

    #[test]
    fn test_validate_metrics_path() {
        assert_eq!(validate_metrics_path("/metrics").unwrap(), "/metrics");
        assert!(validate_metrics_path("metrics").is_err());
        assert!(validate_metrics_path("/").is_err());
        assert!(validate_metrics_path("/health").is_err());
        assert_eq!(
            validate_metrics_path("/prometheus/metrics").unwrap(),
            "/prometheus/metrics"
        );
    }

    #[test]
    fn test_metrics_path_route_syntax_rejected() {
        for path in ["/metrics/*", "/*", "/:x", "/a{b}", "/metrics/*rest"] {
            assert!(
                matches!(validate_metrics_path(path), Err(Error::Configuration(_))),
                "{} accepted",
                path
            );
        }
        let result = ExporterConfig::resolve(
            &cli(&["--web.telemetry-path", "/metrics/:name", "datanode"]),
            &FileConfig::default(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_datanode_defaults() {
        let config = ExporterConfig::resolve(&cli(&["datanode"]), &FileConfig::default()).unwrap();
        assert_eq!(config.target, DeploymentTarget::DataNode);
        assert_eq!(config.listen_address.port(), 9077);
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(
            config.upstream,
            UpstreamConfig::Jmx {
                url: "http://localhost:50075/jmx".to_string()
            }
        );
    }

    #[test]
    fn test_zookeeper_defaults() {
        let config = ExporterConfig::resolve(&cli(&["zookeeper"]), &FileConfig::default()).unwrap();
        assert_eq!(config.listen_address.port(), 9079);
        assert_eq!(
            config.upstream,
            UpstreamConfig::Mntr {
                host: "localhost".to_string(),
                port: 2181,
                query: MntrQuery::Socket,
                refresh: RefreshPolicy::EveryScrape,
            }
        );
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = ExporterConfig::resolve(
            &cli(&[
                "--web.listen-address",
                "127.0.0.1:19070",
                "--web.telemetry-path",
                "/prom",
                "--upstream.timeout-secs",
                "3",
                "namenode",
                "--namenode.jmx.url",
                "http://nn01:50070/jmx",
            ]),
            &FileConfig::default(),
        )
        .unwrap();
        assert_eq!(config.target, DeploymentTarget::NameNode);
        assert_eq!(config.listen_address.to_string(), "127.0.0.1:19070");
        assert_eq!(config.metrics_path, "/prom");
        assert_eq!(config.upstream_timeout, Duration::from_secs(3));
        assert_eq!(
            config.upstream,
            UpstreamConfig::Jmx {
                url: "http://nn01:50070/jmx".to_string()
            }
        );
    }

    #[test]
    fn test_file_layer() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen_address = ":19079"
timeout_secs = 2

[zookeeper]
host = "zk01"
port = 2182
refresh = "startup"
"#
        )
        .unwrap();

        let parsed = cli(&[
            "--config",
            file.path().to_str().unwrap(),
            "zookeeper",
            "--zookeeper.port",
            "2183",
        ]);
        let config = ExporterConfig::from_cli(&parsed).unwrap();
        assert_eq!(config.listen_address.port(), 19079);
        assert_eq!(config.upstream_timeout, Duration::from_secs(2));
        // flags win over the file
        assert_eq!(
            config.upstream,
            UpstreamConfig::Mntr {
                host: "zk01".to_string(),
                port: 2183,
                query: MntrQuery::Socket,
                refresh: RefreshPolicy::Startup,
            }
        );
    }

    #[test]
    fn test_zookeeper_command_flag() {
        let config = ExporterConfig::resolve(
            &cli(&[
                "zookeeper",
                "--zookeeper.command",
                "echo mntr | nc zk01 2181",
                "--zookeeper.refresh",
                "every-scrape",
            ]),
            &FileConfig::default(),
        )
        .unwrap();
        match config.upstream {
            UpstreamConfig::Mntr { query, refresh, .. } => {
                assert_eq!(
                    query,
                    MntrQuery::Command("echo mntr | nc zk01 2181".to_string())
                );
                assert_eq!(refresh, RefreshPolicy::EveryScrape);
            }
            other => panic!("unexpected upstream {:?}", other),
        }
    }

    #[test]
    fn test_zookeeper_netcat() {
        let config = ExporterConfig::resolve(
            &cli(&["zookeeper", "--zookeeper-host", "zk02", "--zookeeper.netcat"]),
            &FileConfig::default(),
        )
        .unwrap();
        match config.upstream {
            UpstreamConfig::Mntr { host, query, .. } => {
                assert_eq!(host, "zk02");
                assert_eq!(query, MntrQuery::Netcat);
            }
            other => panic!("unexpected upstream {:?}", other),
        }

        // an explicit command wins over netcat
        let file: FileConfig = toml::from_str("[zookeeper]\nnetcat = true\n").unwrap();
        let config = ExporterConfig::resolve(
            &cli(&["zookeeper", "--zookeeper.command", "cat /tmp/mntr"]),
            &file,
        )
        .unwrap();
        match config.upstream {
            UpstreamConfig::Mntr { query, .. } => {
                assert_eq!(query, MntrQuery::Command("cat /tmp/mntr".to_string()));
            }
            other => panic!("unexpected upstream {:?}", other),
        }
    }

    #[test]
    fn test_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timeout_secs = \"soon\"").unwrap();
        let invalid = cli(&["--config", file.path().to_str().unwrap(), "datanode"]);
        assert!(matches!(
            ExporterConfig::from_cli(&invalid),
            Err(Error::Configuration(_))
        ));
        let missing = cli(&["--config", "/nonexistent/exporter.toml", "datanode"]);
        assert!(matches!(
            ExporterConfig::from_cli(&missing),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ExporterConfig::resolve(
            &cli(&["--upstream.timeout-secs", "0", "datanode"]),
            &FileConfig::default(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
