use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_URL: &str = "https://google.com";
pub const DEFAULT_SPEEDTEST_SERVER: &str = "https://speed.cloudflare.com";

/// Upper bound for every interval and timeout setting, one week.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be at most {max:?}")]
    TooLarge {
        field: &'static str,
        max: Duration,
    },

    #[error("{field} is not a valid http(s) URL: {value} ({reason})")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("at least one speed test server is required")]
    NoSpeedTestServers,
}

/// Settings fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub url: String,
    pub page_load_interval: Duration,
    pub speedtest_interval: Duration,
    pub page_load_timeout: Duration,
    pub speedtest_timeout: Duration,
    pub speedtest_servers: Vec<String>,
    pub download_bytes: u64,
    pub upload_bytes: usize,
    pub tick_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            url: DEFAULT_URL.to_string(),
            page_load_interval: Duration::from_secs(15),
            speedtest_interval: Duration::from_secs(900),
            page_load_timeout: Duration::from_secs(30),
            speedtest_timeout: Duration::from_secs(120),
            speedtest_servers: vec![DEFAULT_SPEEDTEST_SERVER.to_string()],
            download_bytes: 25_000_000,
            upload_bytes: 10_000_000,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl WatchdogConfig {
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("page load interval", self.page_load_interval),
            ("speed test interval", self.speedtest_interval),
            ("page load timeout", self.page_load_timeout),
            ("speed test timeout", self.speedtest_timeout),
            ("tick interval", self.tick_interval),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Zero { field: *field });
        }
        if let Some((field, _)) = durations.iter().find(|(_, d)| *d > MAX_DURATION) {
            return Err(ConfigError::TooLarge {
                field: *field,
                max: MAX_DURATION,
            });
        }
        if self.download_bytes == 0 {
            return Err(ConfigError::Zero {
                field: "download bytes",
            });
        }
        if self.upload_bytes == 0 {
            return Err(ConfigError::Zero {
                field: "upload bytes",
            });
        }

        validate_url("url", &self.url)?;

        if self.speedtest_servers.is_empty() {
            return Err(ConfigError::NoSpeedTestServers);
        }
        for server in &self.speedtest_servers {
            validate_url("speed test server", server)?;
        }

        Ok(())
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}
