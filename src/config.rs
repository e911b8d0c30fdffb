//! Test options shared by the latency probe and both transfer phases.

use crate::error::{Error, Result};
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/86.0.4240.75 Safari/537.36 Edg/86.0.622.38";

pub const DEFAULT_PING_COUNT: usize = 50;
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(6);
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where outgoing connections are bound locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LocalBind {
    #[default]
    Any,
    /// Bind to a local IP address; remote addresses of the other family are skipped.
    Address(IpAddr),
    /// Bind to the first IPv4 address of the named network interface.
    Interface(String),
}

impl LocalBind {
    /// Local address for outgoing sockets; `None` leaves the choice to the OS.
    pub fn local_ip(&self) -> Result<Option<IpAddr>> {
        match self {
            LocalBind::Any => Ok(None),
            LocalBind::Address(ip) => Ok(Some(*ip)),
            LocalBind::Interface(name) => {
                let interfaces = if_addrs::get_if_addrs().map_err(|e| {
                    Error::Config(format!("cannot list network interfaces: {}", e))
                })?;
                let addrs = interfaces.iter().map(|iface| (iface.name.as_str(), iface.ip()));
                interface_ipv4(name, addrs).map(Some)
            }
        }
    }
}

fn interface_ipv4<'a>(
    name: &str,
    addrs: impl IntoIterator<Item = (&'a str, IpAddr)>,
) -> Result<IpAddr> {
    let mut known = false;
    for (iface, ip) in addrs {
        if iface != name {
            continue;
        }
        known = true;
        if ip.is_ipv4() {
            return Ok(ip);
        }
    }
    Err(Error::Config(if known {
        format!("interface {} has no IPv4 address", name)
    } else {
        format!("no network interface named {}", name)
    }))
}

/// Immutable options for one speed test run.
///
/// Built with the `with_*` methods and checked once with [`TestConfiguration::validate`]
/// before any connection is opened.
#[derive(Debug, Clone)]
pub struct TestConfiguration {
    pub ping_count: usize,
    pub download_duration: Duration,
    pub upload_duration: Duration,
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
    pub poll_interval: Duration,
    pub headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    pub local_bind: LocalBind,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            ping_count: DEFAULT_PING_COUNT,
            download_duration: DEFAULT_TEST_DURATION,
            upload_duration: DEFAULT_TEST_DURATION,
            download_concurrency: DEFAULT_CONCURRENCY,
            upload_concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            headers: Vec::new(),
            user_agent: None,
            local_bind: LocalBind::Any,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl TestConfiguration {
    pub fn with_ping_count(mut self, count: usize) -> Self {
        self.ping_count = count;
        self
    }

    /// Sets the same duration for both phases.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.download_duration = duration;
        self.upload_duration = duration;
        self
    }

    /// Sets the same number of parallel connections for both phases.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency;
        self.upload_concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_local_bind(mut self, bind: LocalBind) -> Self {
        self.local_bind = bind;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Headers sent with every handshake.
    ///
    /// A `user-agent` given explicitly in `headers` wins; otherwise the configured
    /// user agent, or [`DEFAULT_USER_AGENT`], is appended.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        let has_user_agent = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"));
        if !has_user_agent {
            let user_agent = match self.user_agent.as_deref() {
                Some(ua) if !ua.is_empty() => ua,
                _ => DEFAULT_USER_AGENT,
            };
            headers.push(("user-agent".to_string(), user_agent.to_string()));
        }
        headers
    }

    pub fn validate(&self) -> Result<()> {
        if self.ping_count == 0 {
            return Err(Error::Config("ping count must be at least 1".into()));
        }
        if self.download_duration.is_zero() || self.upload_duration.is_zero() {
            return Err(Error::Config("test duration must be positive".into()));
        }
        if self.download_concurrency == 0 || self.upload_concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        if self.connect_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        for (name, value) in &self.headers {
            if name.is_empty() || !name.bytes().all(is_token_byte) {
                return Err(Error::Config(format!("invalid header name: {:?}", name)));
            }
            if value.bytes().any(|b| b == b'\r' || b == b'\n') {
                return Err(Error::Config(format!("invalid value for header {}", name)));
            }
        }
        if let LocalBind::Interface(name) = &self.local_bind {
            if name.is_empty() {
                return Err(Error::Config("interface name must not be empty".into()));
            }
        }
        Ok(())
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_test_shape() {
        let config = TestConfiguration::default();
        assert_eq!(config.ping_count, 50);
        assert_eq!(config.download_duration, Duration::from_secs(6));
        assert_eq!(config.upload_concurrency, 5);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_user_agent_is_added_once() {
        let headers = TestConfiguration::default().request_headers();
        let agents: Vec<_> = headers.iter().filter(|(n, _)| n == "user-agent").collect();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].1, DEFAULT_USER_AGENT);
    }

    #[test]
    fn explicit_user_agent_header_wins() {
        let headers = TestConfiguration::default()
            .with_user_agent("ignored/1.0")
            .with_header("User-Agent", "custom/2.0")
            .request_headers();
        assert_eq!(headers, vec![("User-Agent".to_string(), "custom/2.0".to_string())]);
    }

    #[test]
    fn configured_user_agent_is_used() {
        let headers = TestConfiguration::default()
            .with_user_agent("beespeed-test")
            .request_headers();
        assert!(headers.contains(&("user-agent".to_string(), "beespeed-test".to_string())));
    }

    #[test]
    fn zero_values_are_rejected() {
        let cases = [
            TestConfiguration::default().with_ping_count(0),
            TestConfiguration::default().with_duration(Duration::ZERO),
            TestConfiguration::default().with_concurrency(0),
            TestConfiguration::default().with_poll_interval(Duration::ZERO),
            TestConfiguration::default().with_connect_timeout(Duration::ZERO),
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let bad_name = TestConfiguration::default().with_header("bad header", "x");
        assert!(matches!(bad_name.validate(), Err(Error::Config(_))));

        let bad_value = TestConfiguration::default().with_header("x-test", "a\r\nb");
        assert!(matches!(bad_value.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn interface_resolves_to_its_first_ipv4_address() {
        let addrs: [(&str, IpAddr); 4] = [
            ("eth0", "fe80::1".parse().unwrap()),
            ("wlan0", "10.0.0.7".parse().unwrap()),
            ("eth0", "192.168.1.20".parse().unwrap()),
            ("eth0", "192.168.1.21".parse().unwrap()),
        ];
        let ip = interface_ipv4("eth0", addrs).unwrap();
        assert_eq!(ip, "192.168.1.20".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn interface_without_ipv4_or_unknown_is_a_config_error() {
        let addrs: [(&str, IpAddr); 1] = [("eth0", "fe80::1".parse().unwrap())];
        let err = interface_ipv4("eth0", addrs).unwrap_err();
        assert!(matches!(&err, Error::Config(m) if m.contains("no IPv4")), "{:?}", err);

        let err = interface_ipv4("en9", addrs).unwrap_err();
        assert!(matches!(&err, Error::Config(m) if m.contains("no network interface")), "{:?}", err);
    }

    #[test]
    fn loopback_interface_binds_to_its_address() {
        let loopback = if_addrs::get_if_addrs()
            .unwrap()
            .into_iter()
            .find(|iface| iface.is_loopback() && iface.ip().is_ipv4())
            .expect("host has an IPv4 loopback interface");

        let ip = LocalBind::Interface(loopback.name.clone()).local_ip().unwrap();
        assert_eq!(ip, Some(loopback.ip()));

        let unknown = LocalBind::Interface("beespeed-missing0".into()).local_ip();
        assert!(matches!(unknown, Err(Error::Config(_))));
        assert_eq!(LocalBind::Any.local_ip().unwrap(), None);
    }

    #[test]
    fn empty_interface_is_rejected() {
        let config =
            TestConfiguration::default().with_local_bind(LocalBind::Interface(String::new()));
        assert!(config.validate().is_err());
    }
}
