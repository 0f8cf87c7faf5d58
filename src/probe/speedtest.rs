use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};

use super::{Probe, ProbeError, SpeedTestStage};

const BYTES_PER_MEGABYTE: f64 = 1_000_000.0;
const LATENCY_SAMPLES: usize = 3;

/// A speed test server reachable over HTTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedServer {
    pub url: String,
}

impl SpeedServer {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
        }
    }

    fn download_url(&self, bytes: u64) -> String {
        format!("{}/__down?bytes={}", self.url, bytes)
    }

    fn upload_url(&self) -> String {
        format!("{}/__up", self.url)
    }
}

/// Throughput measurements against a speed test backend, in bytes/sec.
#[async_trait]
pub trait SpeedTestClient: Send + Sync {
    async fn best_server(&self) -> Result<SpeedServer, ProbeError>;

    async fn download(&self, server: &SpeedServer) -> Result<f64, ProbeError>;

    async fn upload(&self, server: &SpeedServer) -> Result<f64, ProbeError>;
}

/// Speed test client for servers exposing `GET /__down?bytes=N` and `POST /__up`.
#[derive(Debug, Clone)]
pub struct HttpSpeedTest {
    client: Client,
    servers: Vec<SpeedServer>,
    download_bytes: u64,
    upload_bytes: usize,
}

impl HttpSpeedTest {
    pub fn new(
        servers: Vec<SpeedServer>,
        download_bytes: u64,
        upload_bytes: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            servers,
            download_bytes,
            upload_bytes,
        })
    }

    /// Best of a few zero-byte round trips
    async fn latency(&self, server: &SpeedServer) -> Result<Duration, reqwest::Error> {
        let mut best = Duration::MAX;
        for _ in 0..LATENCY_SAMPLES {
            let start = Instant::now();
            self.client
                .get(server.download_url(0))
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            best = best.min(start.elapsed());
        }
        Ok(best)
    }
}

#[async_trait]
impl SpeedTestClient for HttpSpeedTest {
    async fn best_server(&self) -> Result<SpeedServer, ProbeError> {
        let mut best: Option<(Duration, &SpeedServer)> = None;

        for server in &self.servers {
            match self.latency(server).await {
                Ok(latency) => {
                    tracing::debug!(server = %server.url, ?latency, "speed test server reachable");
                    if best.map_or(true, |(current, _)| latency < current) {
                        best = Some((latency, server));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        server = %server.url,
                        error = %err,
                        "speed test server unreachable"
                    );
                }
            }
        }

        best.map(|(_, server)| server.clone()).ok_or_else(|| {
            ProbeError::measurement(
                SpeedTestStage::ServerDiscovery,
                "no reachable speed test server",
            )
        })
    }

    async fn download(&self, server: &SpeedServer) -> Result<f64, ProbeError> {
        let stage = SpeedTestStage::Download;
        let start = Instant::now();

        let mut response = self
            .client
            .get(server.download_url(self.download_bytes))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProbeError::measurement(stage, e))?;

        let mut received = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProbeError::measurement(stage, e))?
        {
            received += chunk.len() as u64;
        }

        throughput(stage, received, start.elapsed())
    }

    async fn upload(&self, server: &SpeedServer) -> Result<f64, ProbeError> {
        let stage = SpeedTestStage::Upload;
        let payload = vec![0u8; self.upload_bytes];
        let start = Instant::now();

        self.client
            .post(server.upload_url())
            .body(payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProbeError::measurement(stage, e))?
            .bytes()
            .await
            .map_err(|e| ProbeError::measurement(stage, e))?;

        throughput(stage, self.upload_bytes as u64, start.elapsed())
    }
}

fn throughput(stage: SpeedTestStage, bytes: u64, elapsed: Duration) -> Result<f64, ProbeError> {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return Err(ProbeError::measurement(stage, "no data transferred"));
    }
    Ok(bytes as f64 / secs)
}

/// Converts bytes/sec to MB/s rounded to two decimals.
pub(crate) fn to_megabytes(bytes_per_sec: f64) -> f64 {
    (bytes_per_sec / BYTES_PER_MEGABYTE * 100.0).round() / 100.0
}

/// Download and upload of one speed test pass, in MB/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReading {
    pub download_mb: f64,
    pub upload_mb: f64,
}

/// Runs discovery, download and upload in sequence. A reading is only
/// produced when every stage succeeded.
pub struct SpeedTestProbe<C> {
    client: C,
    timeout: Duration,
}

impl<C: SpeedTestClient> SpeedTestProbe<C> {
    pub fn new(client: C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn run_pass(&self) -> Result<SpeedReading, ProbeError> {
        let server = self.client.best_server().await?;
        tracing::debug!(server = %server.url, "selected speed test server");

        let download = self.client.download(&server).await?;
        let upload = self.client.upload(&server).await?;

        Ok(SpeedReading {
            download_mb: to_megabytes(download),
            upload_mb: to_megabytes(upload),
        })
    }
}

#[async_trait]
impl<C: SpeedTestClient> Probe for SpeedTestProbe<C> {
    type Reading = SpeedReading;

    fn label(&self) -> &str {
        "speedtest"
    }

    async fn measure(&self) -> Result<SpeedReading, ProbeError> {
        tokio::time::timeout(self.timeout, self.run_pass())
            .await
            .map_err(|_| ProbeError::Timeout {
                after: self.timeout,
            })?
    }
}
