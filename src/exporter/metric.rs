use prometheus::{Gauge, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::gauge::{GaugeStore, WatchdogGauge};

/// Prometheus-backed gauge store
#[derive(Debug, Clone)]
pub struct WatchdogMetrics {
    /// Speed test upload throughput in MB/s
    speedtest_upload: Gauge,
    /// Speed test download throughput in MB/s
    speedtest_download: Gauge,
    /// Page load time in seconds
    page_load: Gauge,
    /// Prometheus registry
    registry: Arc<Registry>,
}

impl WatchdogMetrics {
    /// Creates the registry and registers one gauge per `WatchdogGauge`.
    ///
    /// Every gauge starts out as NaN so a scrape before the first probe pass
    /// cannot be mistaken for a real reading.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let speedtest_upload = register_gauge(&registry, WatchdogGauge::SpeedtestUpload)?;
        let speedtest_download = register_gauge(&registry, WatchdogGauge::SpeedtestDownload)?;
        let page_load = register_gauge(&registry, WatchdogGauge::PageLoad)?;

        Ok(Self {
            speedtest_upload,
            speedtest_download,
            page_load,
            registry,
        })
    }

    fn gauge(&self, gauge: WatchdogGauge) -> &Gauge {
        match gauge {
            WatchdogGauge::SpeedtestUpload => &self.speedtest_upload,
            WatchdogGauge::SpeedtestDownload => &self.speedtest_download,
            WatchdogGauge::PageLoad => &self.page_load,
        }
    }

    /// Gets metrics data in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        encoder.encode_to_string(&metric_families).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode metrics");
            String::new()
        })
    }
}

fn register_gauge(registry: &Registry, gauge: WatchdogGauge) -> Result<Gauge, prometheus::Error> {
    let metric = Gauge::with_opts(Opts::new(gauge.name(), gauge.help()))?;
    metric.set(f64::NAN);
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl GaugeStore for WatchdogMetrics {
    fn set(&self, gauge: WatchdogGauge, value: f64) {
        self.gauge(gauge).set(value);
    }

    fn read_all(&self) -> BTreeMap<&'static str, f64> {
        WatchdogGauge::ALL
            .iter()
            .map(|g| (g.name(), self.gauge(*g).get()))
            .collect()
    }
}

/// HTTP server to expose the /metrics endpoint
pub mod http_server {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::service_fn;
    use hyper::{Method, Request, Response, StatusCode};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use hyper_util::server::conn::auto::Builder;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Binds the metrics listener. Split from `serve` so the socket is
    /// accepting before the scheduler loop starts.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Serves scrapes forever, one tokio task per connection.
    pub async fn serve(listener: TcpListener, metrics: Arc<WatchdogMetrics>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let metrics = metrics.clone();

                    tokio::task::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| handle_request(req, metrics.clone()));

                        if let Err(err) = Builder::new(TokioExecutor::new())
                            .serve_connection(io, service)
                            .await
                        {
                            tracing::warn!(%peer, error = %err, "error serving metrics connection");
                        }
                    });
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to accept metrics connection");
                }
            }
        }
    }

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
        metrics: Arc<WatchdogMetrics>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match (req.method(), req.uri().path()) {
            (&Method::GET, "/metrics") | (&Method::GET, "/") => {
                let mut response = Response::new(Full::new(Bytes::from(metrics.gather())));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                response
            }
            _ => {
                let mut response = Response::new(Full::new(Bytes::from("Not Found")));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gauge::FAILURE_SENTINEL;

    fn value_line<'a>(body: &'a str, name: &str) -> Option<&'a str> {
        body.lines()
            .find(|line| line.starts_with(name) && !line.starts_with('#'))
            .and_then(|line| line.split_whitespace().nth(1))
    }

    #[test]
    fn gauges_start_unset() {
        let metrics = WatchdogMetrics::new().unwrap();
        let values = metrics.read_all();

        assert_eq!(values.len(), 3);
        assert!(values.values().all(|v| v.is_nan()));
    }

    #[test]
    fn set_overwrites_previous_value() {
        let metrics = WatchdogMetrics::new().unwrap();
        metrics.set(WatchdogGauge::PageLoad, 0.42);
        metrics.set(WatchdogGauge::PageLoad, FAILURE_SENTINEL);

        let values = metrics.read_all();
        assert_eq!(values["watchdog_pageload_in_sec"], -1.0);
        assert!(values["watchdog_speedtest_upload_mb"].is_nan());
    }

    #[test]
    fn gather_renders_all_three_gauges() {
        let metrics = WatchdogMetrics::new().unwrap();
        metrics.set(WatchdogGauge::SpeedtestDownload, 50.0);
        metrics.set(WatchdogGauge::SpeedtestUpload, 12.5);
        metrics.set(WatchdogGauge::PageLoad, 0.25);

        let body = metrics.gather();
        for gauge in WatchdogGauge::ALL {
            assert!(body.contains(&format!("# HELP {} {}", gauge.name(), gauge.help())));
            assert!(body.contains(&format!("# TYPE {} gauge", gauge.name())));
        }
        assert_eq!(value_line(&body, "watchdog_speedtest_download_mb"), Some("50"));
        assert_eq!(value_line(&body, "watchdog_speedtest_upload_mb"), Some("12.5"));
        assert_eq!(value_line(&body, "watchdog_pageload_in_sec"), Some("0.25"));
    }

    #[test]
    fn concurrent_scrapes_never_see_torn_values() {
        let metrics = Arc::new(WatchdogMetrics::new().unwrap());
        let writer = {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                for i in 0..5_000 {
                    let value = if i % 2 == 0 { 1.25 } else { FAILURE_SENTINEL };
                    metrics.set(WatchdogGauge::PageLoad, value);
                }
            })
        };

        for _ in 0..500 {
            let body = metrics.gather();
            let raw = value_line(&body, "watchdog_pageload_in_sec").unwrap();
            let value: f64 = raw.parse().unwrap();
            assert!(value.is_nan() || value == 1.25 || value == FAILURE_SENTINEL);
        }

        writer.join().unwrap();
    }

    #[tokio::test]
    async fn endpoint_serves_metrics_and_rejects_unknown_paths() {
        let metrics = Arc::new(WatchdogMetrics::new().unwrap());
        metrics.set(WatchdogGauge::PageLoad, FAILURE_SENTINEL);

        let listener = http_server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(http_server::serve(listener, metrics.clone()));

        let client = reqwest::Client::new();
        for path in ["/metrics", "/"] {
            let response = client
                .get(format!("http://{}{}", addr, path))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let content_type = response.headers()[reqwest::header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .to_string();
            assert_eq!(content_type, prometheus::TEXT_FORMAT);
            assert!(content_type.starts_with("text/plain"));
            let body = response.text().await.unwrap();
            assert_eq!(value_line(&body, "watchdog_pageload_in_sec"), Some("-1"));
        }

        let missing = client
            .get(format!("http://{}/nope", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
