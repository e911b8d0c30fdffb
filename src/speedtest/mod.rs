pub mod ping;
pub mod pool;
pub mod progress;
pub mod stats;
pub mod transport;
pub mod worker;

use crate::config::TestConfiguration;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use ping::{LatencyProbe, LatencyResult};
pub use pool::{PhaseState, WorkerPool};
pub use progress::IntermediateSample;
pub use transport::{Dialer, WsConnector, WsTransfer, BUFFER_SIZE, UPLOAD_MESSAGE_SIZE};
pub use worker::{Connector, Transfer, WorkerKind};

/// Where the ping, download and upload sockets live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoints {
    ping_url: Url,
    download_url: Url,
    upload_url: Url,
    isp_label: String,
}

impl ServerEndpoints {
    /// Validates the three URLs. `http`/`https` URLs are dialed as `ws`/`wss`.
    pub fn new(
        ping_url: &str,
        download_url: &str,
        upload_url: &str,
        isp_label: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            ping_url: parse_endpoint(ping_url)?,
            download_url: parse_endpoint(download_url)?,
            upload_url: parse_endpoint(upload_url)?,
            isp_label: isp_label.into(),
        })
    }

    pub fn ping_url(&self) -> &Url {
        &self.ping_url
    }

    pub fn download_url(&self) -> &Url {
        &self.download_url
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    pub fn isp_label(&self) -> &str {
        &self.isp_label
    }
}

/// Parses a server URL into the WebSocket URL that will be dialed.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("not a valid server URL {:?}: {}", raw, e)))?;
    let url = match url.scheme() {
        "ws" | "wss" => url,
        "http" | "https" => {
            let rest = &raw[url.scheme().len()..];
            let ws_scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            Url::parse(&format!("{}{}", ws_scheme, rest))
                .map_err(|e| Error::Config(format!("not a valid server URL {:?}: {}", raw, e)))?
        }
        other => {
            return Err(Error::Config(format!(
                "unsupported scheme {:?} in server URL {}",
                other, raw
            )))
        }
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Config(format!("server URL has no host: {}", raw)));
    }
    Ok(url)
}

/// Outcome of one download or upload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseResult {
    pub bytes_total: u64,
    pub elapsed: Duration,
}

impl PhaseResult {
    /// Average throughput in megabits per second.
    pub fn mbps(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        self.bytes_total as f64 / seconds / 125_000.0
    }

    pub fn data_used(&self) -> String {
        humanize_bytes(self.bytes_total)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub ping_millis: f64,
    pub jitter_millis: f64,
    pub download: Option<PhaseResult>,
    pub upload: Option<PhaseResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
    Complete,
}

/// SI byte count, `"82 MB"` or `"8.2 MB"` style.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 10 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[unit])
    } else {
        format!("{:.0} {}", value, UNITS[unit])
    }
}

pub async fn run_latency_probe(
    endpoints: &ServerEndpoints,
    config: &TestConfiguration,
) -> Result<LatencyResult> {
    config.validate()?;
    LatencyProbe::new(endpoints, config).run(|_| {}).await
}

pub async fn run_transfer_phase<F>(
    kind: WorkerKind,
    endpoints: &ServerEndpoints,
    config: &TestConfiguration,
    on_progress: F,
) -> Result<PhaseResult>
where
    F: Fn(IntermediateSample) + Send + 'static,
{
    config.validate()?;
    let (concurrency, duration) = match kind {
        WorkerKind::Download => (config.download_concurrency, config.download_duration),
        WorkerKind::Upload => (config.upload_concurrency, config.upload_duration),
    };
    let connector = Arc::new(WsConnector::new(endpoints, config));
    let mut pool = WorkerPool::new(connector, kind, concurrency, duration, config.poll_interval);
    pool.run(on_progress).await
}

/// One full test against one server: latency, then download, then upload.
///
/// Each step writes only its own fields of the [`TestResult`].
pub struct Speedtest {
    endpoints: ServerEndpoints,
    config: TestConfiguration,
    result: TestResult,
}

impl Speedtest {
    pub fn new(endpoints: ServerEndpoints, config: TestConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            endpoints,
            config,
            result: TestResult::default(),
        })
    }

    pub fn endpoints(&self) -> &ServerEndpoints {
        &self.endpoints
    }

    pub fn config(&self) -> &TestConfiguration {
        &self.config
    }

    pub fn result(&self) -> &TestResult {
        &self.result
    }

    pub async fn test_ping(&mut self) -> Result<LatencyResult> {
        self.test_ping_with(|_| {}).await
    }

    /// Like [`Speedtest::test_ping`], handing every measured latency to `on_sample`.
    pub async fn test_ping_with<F>(&mut self, on_sample: F) -> Result<LatencyResult>
    where
        F: FnMut(f64),
    {
        let latency = LatencyProbe::new(&self.endpoints, &self.config)
            .run(on_sample)
            .await?;
        self.result.ping_millis = latency.mean_latency_ms;
        self.result.jitter_millis = latency.jitter_ms;
        Ok(latency)
    }

    pub async fn test_speed<F>(&mut self, kind: WorkerKind, on_progress: F) -> Result<PhaseResult>
    where
        F: Fn(IntermediateSample) + Send + 'static,
    {
        let phase = run_transfer_phase(kind, &self.endpoints, &self.config, on_progress).await?;
        match kind {
            WorkerKind::Download => self.result.download = Some(phase),
            WorkerKind::Upload => self.result.upload = Some(phase),
        }
        Ok(phase)
    }
}
