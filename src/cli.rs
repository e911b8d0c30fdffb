use anyhow::Result;
use beespeed::config::{DEFAULT_CONCURRENCY, DEFAULT_PING_COUNT};
use beespeed::discovery::DEFAULT_HOME_URL;
use beespeed::{LocalBind, ServerEndpoints, TestConfiguration};
use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "beespeed")]
#[command(about = "An unofficial BenchBee speed test", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Bind to the IPv4 address of the specified interface when connecting to servers
    #[arg(short = 'I', long, conflicts_with = "ip")]
    pub interface: Option<String>,

    /// Bind to the specified local IP address when connecting to servers
    #[arg(short = 'i', long)]
    pub ip: Option<IpAddr>,

    /// Parallel connections per transfer phase
    #[arg(short, long, env = "BENCHBEE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// User agent sent to the servers
    #[arg(long, env = "BENCHBEE_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Number of latency probes
    #[arg(short = 'n', long, default_value_t = DEFAULT_PING_COUNT)]
    pub ping_count: usize,

    /// Duration of each transfer phase in seconds
    #[arg(short = 't', long, default_value_t = 6)]
    pub duration: u64,

    /// Ping WebSocket URL; skips discovery together with --download-url and --upload-url
    #[arg(long, requires_all = ["download_url", "upload_url"])]
    pub ping_url: Option<String>,

    /// Download WebSocket URL
    #[arg(long, requires_all = ["ping_url", "upload_url"])]
    pub download_url: Option<String>,

    /// Upload WebSocket URL
    #[arg(long, requires_all = ["ping_url", "download_url"])]
    pub upload_url: Option<String>,

    /// Page the server settings are read from
    #[arg(long, default_value = DEFAULT_HOME_URL)]
    pub home_url: String,

    /// Print plain lines instead of the terminal UI
    #[arg(long)]
    pub plain: bool,
}

impl Cli {
    pub fn config(&self) -> TestConfiguration {
        let local_bind = match (&self.interface, self.ip) {
            (Some(name), _) => LocalBind::Interface(name.clone()),
            (None, Some(ip)) => LocalBind::Address(ip),
            (None, None) => LocalBind::Any,
        };
        let config = TestConfiguration::default()
            .with_ping_count(self.ping_count)
            .with_duration(Duration::from_secs(self.duration))
            .with_concurrency(self.concurrency)
            .with_local_bind(local_bind);
        match &self.user_agent {
            Some(ua) if !ua.is_empty() => config.with_user_agent(ua.clone()),
            _ => config,
        }
    }

    /// Endpoints given on the command line, if any.
    pub fn explicit_endpoints(&self) -> Result<Option<ServerEndpoints>> {
        match (&self.ping_url, &self.download_url, &self.upload_url) {
            (Some(ping), Some(download), Some(upload)) => Ok(Some(ServerEndpoints::new(
                ping,
                download,
                upload,
                "custom server",
            )?)),
            _ => Ok(None),
        }
    }
}
