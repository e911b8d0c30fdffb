//! Finds the speed-test server for this client.
//!
//! The BenchBee home page embeds the server URLs as `settings.url_*` assignments in
//! an inline script, next to the client's ISP name and IP address. The server host is
//! then located through ip-api.com.

use crate::config::TestConfiguration;
use crate::error::{Error, Result};
use crate::speedtest::{parse_endpoint, ServerEndpoints};
use log::{info, warn};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HOME_URL: &str = "http://beta.benchbee.co.kr/home.asp";

const IP_API_URL: &str = "http://ip-api.com/json";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// ip-api.com lookup result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpInfo {
    pub query: String,
    pub status: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub region_name: String,
    pub city: String,
    pub zip: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
    pub isp: String,
    pub org: String,
    #[serde(rename = "as")]
    pub as_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub isp: String,
    pub ip: String,
    pub download: Option<String>,
    pub upload: Option<String>,
    pub ping_ws: Option<String>,
    pub download_ws: Option<String>,
    pub upload_ws: Option<String>,
    pub representative_url: Option<Url>,
    pub server_ip_info: Option<IpInfo>,
}

impl ServerInfo {
    /// Client label shown next to the results, `"<isp> (<ip>)"`.
    pub fn isp_label(&self) -> String {
        match (self.isp.is_empty(), self.ip.is_empty()) {
            (false, false) => format!("{} ({})", self.isp, self.ip),
            (false, true) => self.isp.clone(),
            (true, false) => self.ip.clone(),
            (true, true) => "unknown".to_string(),
        }
    }

    /// Server label, `"<isp> - <city>, <region>, <country>"`, falling back to the host.
    pub fn server_label(&self) -> String {
        match &self.server_ip_info {
            Some(info) if info.status != "fail" => format!(
                "{} - {}, {}, {}",
                info.isp, info.city, info.region_name, info.country
            ),
            _ => self
                .representative_url
                .as_ref()
                .and_then(|url| url.host_str())
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    /// WebSocket endpoints; a page without `url_dn_ws`/`url_up_ws` falls back to
    /// the plain `url_dn`/`url_up` addresses, dialed as WebSocket.
    pub fn endpoints(&self) -> Result<ServerEndpoints> {
        let required = |value: Option<&String>, name: &str| {
            value
                .cloned()
                .ok_or_else(|| Error::Discovery(format!("home page has no {} URL", name)))
        };
        ServerEndpoints::new(
            &required(self.ping_ws.as_ref(), "ping")?,
            &required(self.download_ws.as_ref().or(self.download.as_ref()), "download")?,
            &required(self.upload_ws.as_ref().or(self.upload.as_ref()), "upload")?,
            self.isp_label(),
        )
    }
}

/// HTTP client for discovery, honouring the configured headers and local binding.
pub fn http_client(config: &TestConfiguration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in config.request_headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::Config(format!("invalid value for header {}: {}", name, e)))?;
        headers.append(name, value);
    }

    let builder = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(config.connect_timeout);
    let builder = match config.local_bind.local_ip()? {
        Some(ip) => builder.local_address(ip),
        None => builder,
    };
    Ok(builder.build()?)
}

pub async fn fetch_server_info(client: &reqwest::Client, home_url: &str) -> Result<ServerInfo> {
    info!("Fetching server settings from {}", home_url);
    let body = client
        .get(home_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let mut server = parse_home_page(&body)?;
    let host = server
        .representative_url
        .as_ref()
        .and_then(|url| url.host_str())
        .map(str::to_owned);
    if let Some(host) = host {
        match lookup_ip_info(client, &host).await {
            Ok(ip_info) => server.server_ip_info = Some(ip_info),
            Err(err) => warn!("Could not locate server {}: {}", host, err),
        }
    }
    Ok(server)
}

pub fn parse_home_page(html: &str) -> Result<ServerInfo> {
    let settings = Regex::new(r#"(settings\.url_[a-z_]+)\s?=\s?['"]([^'"]+)['"];"#)
        .map_err(|e| Error::Discovery(e.to_string()))?;

    // The client address is the `.ipadrs` element inside the `.ipprd` block.
    let client_ip = format!("{}(?s:.*?){}", class_tag("ipprd"), class_tag("ipadrs"));
    let mut server = ServerInfo {
        isp: element_text(html, r#"<[a-zA-Z0-9]+[^>]*id=["']isp_name["'][^>]*"#)?,
        ip: element_text(html, &client_ip)?,
        ..ServerInfo::default()
    };

    for captures in settings.captures_iter(html) {
        let name = &captures[1];
        let value = captures[2].trim().to_string();
        let url = parse_endpoint(&value).map_err(|_| {
            Error::Discovery(format!("possibly not a valid server URL: {}", value))
        })?;
        if server.representative_url.is_none() {
            server.representative_url = Some(url);
        }

        match name {
            "settings.url_dn" => server.download = Some(value),
            "settings.url_up" => server.upload = Some(value),
            "settings.url_dn_ws" => server.download_ws = Some(value),
            "settings.url_up_ws" => server.upload_ws = Some(value),
            "settings.url_ping" => server.ping_ws = Some(value),
            _ => {}
        }
    }

    if server.representative_url.is_none() {
        return Err(Error::Discovery(
            "no server URL found on the home page".into(),
        ));
    }
    Ok(server)
}

/// Opening tag carrying `class` among its classes, without the closing `>`.
fn class_tag(class: &str) -> String {
    format!(r#"<[a-zA-Z0-9]+[^>]*class=["'][^"']*\b{}\b[^"']*["'][^>]*"#, class)
}

/// Trimmed text of the first element whose opening tag ends the match of `opening`.
fn element_text(html: &str, opening: &str) -> Result<String> {
    let pattern = Regex::new(&format!(r"{}>([^<]*)<", opening))
        .map_err(|e| Error::Discovery(e.to_string()))?;
    Ok(pattern
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default())
}

pub async fn lookup_ip_info(client: &reqwest::Client, host: &str) -> Result<IpInfo> {
    let info = client
        .get(format!("{}/{}", IP_API_URL, host))
        .send()
        .await?
        .error_for_status()?
        .json::<IpInfo>()
        .await?;
    if info.status == "fail" {
        warn!("ip-api.com has no record for {}", host);
    }
    Ok(info)
}
