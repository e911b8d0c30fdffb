use super::stats::{average, jitter, now_millis};
use super::transport::{Dialer, WsStream};
use super::ServerEndpoints;
use crate::config::TestConfiguration;
use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use log::debug;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyResult {
    pub mean_latency_ms: f64,
    pub jitter_ms: f64,
    /// Round trips actually completed; below the requested count when the
    /// connection ended early.
    pub samples: usize,
}

/// Sequential `rtt:<millis>` echo exchange on the ping endpoint.
///
/// Exactly `count` probes are sent, each one after the previous echo came back.
pub struct LatencyProbe {
    dialer: Dialer,
    url: Url,
    count: usize,
    probe_timeout: Duration,
}

impl LatencyProbe {
    pub fn new(endpoints: &ServerEndpoints, config: &TestConfiguration) -> Self {
        Self {
            dialer: Dialer::new(config),
            url: endpoints.ping_url().clone(),
            count: config.ping_count,
            probe_timeout: config.probe_timeout,
        }
    }

    pub async fn run<F>(&self, mut on_sample: F) -> Result<LatencyResult>
    where
        F: FnMut(f64),
    {
        if self.count == 0 {
            return Err(Error::Config("ping count must be at least 1".into()));
        }

        let mut stream = self.dialer.dial(&self.url).await?;
        let latencies = self.exchange(&mut stream, &mut on_sample).await;
        let _ = stream.close(None).await;

        if latencies.is_empty() {
            return Err(Error::Connectivity(format!(
                "no echo received from {}",
                self.url
            )));
        }
        Ok(LatencyResult {
            mean_latency_ms: average(&latencies),
            jitter_ms: jitter(&latencies),
            samples: latencies.len(),
        })
    }

    async fn exchange<F>(&self, stream: &mut WsStream, on_sample: &mut F) -> Vec<f64>
    where
        F: FnMut(f64),
    {
        let mut latencies = Vec::with_capacity(self.count);
        for seq in 0..self.count {
            let sent_at = now_millis();
            if let Err(e) = stream.send(Message::text(format!("rtt:{}", sent_at))).await {
                debug!("ping {} could not be sent: {}", seq, e);
                break;
            }

            match timeout(self.probe_timeout, await_echo(stream)).await {
                Ok(Ok(echoed)) => {
                    let latency = (now_millis() - echoed) as f64;
                    on_sample(latency);
                    latencies.push(latency);
                }
                Ok(Err(e)) => {
                    debug!("ping {} got no echo: {}", seq, e);
                    break;
                }
                Err(_) => {
                    debug!("ping {} timed out after {:?}", seq, self.probe_timeout);
                    break;
                }
            }
        }
        latencies
    }
}

async fn await_echo(stream: &mut WsStream) -> Result<i64> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::Transfer("connection closed by server".into()))
            }
            Some(Ok(message)) => {
                if let Some(echoed) = message.to_text().ok().and_then(parse_echo) {
                    return Ok(echoed);
                }
            }
            Some(Err(e)) => return Err(Error::Transfer(e.to_string())),
        }
    }
}

/// Timestamp from an echoed `<tag>:<millis>` message.
fn parse_echo(text: &str) -> Option<i64> {
    let (_, millis) = text.split_once(':')?;
    millis.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_echoed_timestamps() {
        assert_eq!(parse_echo("rtt:1603000000000"), Some(1_603_000_000_000));
        assert_eq!(parse_echo("rtt: 42\n"), Some(42));
    }

    #[test]
    fn ignores_unrelated_messages() {
        assert_eq!(parse_echo("hello"), None);
        assert_eq!(parse_echo("rtt:"), None);
        assert_eq!(parse_echo("rtt:abc"), None);
    }
}
