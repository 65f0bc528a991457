//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (proxy, api, health), and their associated argument
//! structs. Every flag has an environment variable equivalent for
//! container deployments.

use std::net::IpAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "xrouter",
    version,
    about = "Dynamic HTTP reverse proxy with routes replicated from a key/value store",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        xrouter proxy --formation prod            Route traffic for the 'prod' formation\n  \
        xrouter api --formation prod -p 8080      Serve the route management API\n  \
        xrouter health http://localhost:8080      Check a running API instance"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the reverse proxy
    Proxy(Box<ProxyArgs>),

    /// Start the route management API
    Api(Box<ApiArgs>),

    /// Check health of a running API instance
    Health(HealthArgs),
}

/// Where the route store lives.
#[derive(Args, Clone, Debug)]
pub struct StoreArgs {
    /// Formation name; selects the store at `_store.<formation>.service`
    #[arg(long, env = "GILLIAM_FORMATION", help_heading = "Store")]
    pub formation: Option<String>,

    /// Store base URL (overrides --formation)
    #[arg(long, env = "XROUTER_STORE_URL", help_heading = "Store")]
    pub store_url: Option<String>,

    /// Long-poll timeout for a single watch call, in seconds
    #[arg(
        long,
        env = "WATCH_TIMEOUT_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..),
        help_heading = "Store"
    )]
    pub watch_timeout: u64,

    /// Snapshot attempts at startup before running with an empty table
    #[arg(
        long,
        env = "SNAPSHOT_RETRIES",
        default_value_t = 3,
        help_heading = "Store"
    )]
    pub snapshot_retries: u32,
}

impl StoreArgs {
    /// Store URL to connect to, if one is configured.
    #[must_use]
    pub fn resolved_url(&self) -> Option<String> {
        self.store_url.clone().or_else(|| {
            self.formation
                .as_deref()
                .filter(|f| !f.is_empty())
                .map(|formation| format!("http://_store.{formation}.service:4001"))
        })
    }

    #[must_use]
    pub const fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout)
    }
}

#[derive(Args, Clone, Debug)]
pub struct LogArgs {
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        xrouter proxy --formation prod                     Store at _store.prod.service\n  \
        xrouter proxy --store-url http://127.0.0.1:4001    Explicit store\n  \
        xrouter proxy -p 8000 --pretty                     Local dev mode")]
pub struct ProxyArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub log: LogArgs,

    /// Upstream timeout in seconds (connect plus response head, then each
    /// idle gap in a body)
    #[arg(
        long,
        env = "UPSTREAM_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help_heading = "Tuning"
    )]
    pub upstream_timeout: u64,
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        xrouter api --formation prod -p 8080               Store at _store.prod.service\n  \
        xrouter api --store-url http://127.0.0.1:4001      Explicit store")]
pub struct ApiArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub log: LogArgs,

    /// Max request body size in bytes
    #[arg(
        long,
        env = "MAX_BODY_SIZE",
        default_value_t = 1_048_576,
        help_heading = "Tuning"
    )]
    pub max_body: usize,
}

#[derive(Args)]
pub struct HealthArgs {
    /// URL of the running API instance
    #[arg(default_value = "http://localhost:80")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(formation: Option<&str>, store_url: Option<&str>) -> StoreArgs {
        StoreArgs {
            formation: formation.map(String::from),
            store_url: store_url.map(String::from),
            watch_timeout: 5,
            snapshot_retries: 3,
        }
    }

    #[test]
    fn store_url_derives_from_formation() {
        assert_eq!(
            store(Some("prod"), None).resolved_url().as_deref(),
            Some("http://_store.prod.service:4001")
        );
    }

    #[test]
    fn explicit_store_url_wins() {
        assert_eq!(
            store(Some("prod"), Some("http://127.0.0.1:4001"))
                .resolved_url()
                .as_deref(),
            Some("http://127.0.0.1:4001")
        );
        assert_eq!(store(None, None).resolved_url(), None);
        assert_eq!(store(Some(""), None).resolved_url(), None);
    }

    #[test]
    fn proxy_flags_parse() {
        let cli = Cli::try_parse_from([
            "xrouter",
            "proxy",
            "--formation",
            "prod",
            "-p",
            "8000",
            "--upstream-timeout",
            "3",
        ])
        .unwrap();
        let Some(Commands::Proxy(args)) = cli.command else {
            panic!("expected proxy command");
        };
        assert_eq!(args.port, 8000);
        assert_eq!(args.upstream_timeout, 3);
        assert_eq!(args.store.formation.as_deref(), Some("prod"));
    }

    #[test]
    fn ipv6_listen_address_parses() {
        let cli = Cli::try_parse_from(["xrouter", "api", "--host", "::", "-p", "8080"]).unwrap();
        let Some(Commands::Api(args)) = cli.command else {
            panic!("expected api command");
        };
        assert_eq!(
            std::net::SocketAddr::new(args.host, args.port).to_string(),
            "[::]:8080"
        );
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(Cli::try_parse_from(["xrouter", "proxy", "--watch-timeout", "0"]).is_err());
        assert!(Cli::try_parse_from(["xrouter", "proxy", "--upstream-timeout", "0"]).is_err());
        assert!(Cli::try_parse_from(["xrouter", "proxy", "--watch-timeout", "1"]).is_ok());
    }
}
