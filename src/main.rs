mod config;
mod exporter;
mod gauge;
mod logging;
mod probe;
mod scheduler;

use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{runtime::Builder, signal};

use crate::config::{ConfigError, WatchdogConfig};
use crate::exporter::{http_server, hydrate, PageLoadJob, SpeedTestJob, WatchdogMetrics};
use crate::gauge::GaugeStore;
use crate::probe::{HttpSpeedTest, PageLoadProbe, SpeedServer, SpeedTestProbe};
use crate::scheduler::{Job, Scheduler};

/// Connectivity watchdog - periodic page load and speed test probes exported
/// as Prometheus gauges
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Prometheus metrics HTTP port
    #[arg(short, long, env = "WATCHDOG_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Address the metrics listener binds to
    #[arg(long, env = "WATCHDOG_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Page whose load time is measured
    #[arg(short, long, env = "WATCHDOG_URL", default_value = config::DEFAULT_URL)]
    url: String,

    /// Seconds between page load tests
    #[arg(long, env = "WATCHDOG_PAGE_LOAD_INTERVAL", default_value_t = 15)]
    page_load_interval: u64,

    /// Seconds between speed tests
    #[arg(long, env = "WATCHDOG_SPEEDTEST_INTERVAL", default_value_t = 900)]
    speedtest_interval: u64,

    /// Seconds before a page load test is abandoned
    #[arg(long, env = "WATCHDOG_PAGE_LOAD_TIMEOUT", default_value_t = 30)]
    page_load_timeout: u64,

    /// Seconds before a whole speed test pass is abandoned
    #[arg(long, env = "WATCHDOG_SPEEDTEST_TIMEOUT", default_value_t = 120)]
    speedtest_timeout: u64,

    /// Speed test server base URL, repeat or comma separate for several
    #[arg(
        long = "speedtest-server",
        env = "WATCHDOG_SPEEDTEST_SERVERS",
        value_delimiter = ',',
        default_value = config::DEFAULT_SPEEDTEST_SERVER
    )]
    speedtest_servers: Vec<String>,

    /// Bytes fetched by the download measurement
    #[arg(long, env = "WATCHDOG_DOWNLOAD_BYTES", default_value_t = 25_000_000)]
    download_bytes: u64,

    /// Bytes sent by the upload measurement
    #[arg(long, env = "WATCHDOG_UPLOAD_BYTES", default_value_t = 10_000_000)]
    upload_bytes: usize,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "WATCHDOG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<WatchdogConfig, ConfigError> {
        let config = WatchdogConfig {
            bind_address: self.bind,
            port: self.port,
            url: self.url,
            page_load_interval: Duration::from_secs(self.page_load_interval),
            speedtest_interval: Duration::from_secs(self.speedtest_interval),
            page_load_timeout: Duration::from_secs(self.page_load_timeout),
            speedtest_timeout: Duration::from_secs(self.speedtest_timeout),
            speedtest_servers: self.speedtest_servers,
            download_bytes: self.download_bytes,
            upload_bytes: self.upload_bytes,
            ..WatchdogConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(&args.log_level)?;

    let config = args.into_config().map_err(|err| {
        tracing::error!(error = %err, "invalid configuration");
        err
    })?;

    // probes run on the main task, scrapes on the second worker
    let rt = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    rt.block_on(run_watchdog(config)).map_err(|err| {
        tracing::error!(error = format!("{:#}", err), "watchdog stopped");
        err
    })
}

async fn run_watchdog(config: WatchdogConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(WatchdogMetrics::new()?);
    let store: Arc<dyn GaugeStore> = metrics.clone();

    let page_load = PageLoadJob::new(
        PageLoadProbe::new(config.url.clone(), config.page_load_timeout)
            .context("failed to build page load client")?,
        store.clone(),
    );
    let servers = config
        .speedtest_servers
        .iter()
        .map(SpeedServer::new)
        .collect();
    let speedtest = SpeedTestJob::new(
        SpeedTestProbe::new(
            HttpSpeedTest::new(servers, config.download_bytes, config.upload_bytes)
                .context("failed to build speed test client")?,
            config.speedtest_timeout,
        ),
        store,
    );

    tracing::info!("hydrating gauges");
    let jobs: [&dyn Job; 2] = [&page_load, &speedtest];
    hydrate(&jobs).await;

    tracing::info!("creating scheduled jobs");
    let mut scheduler = Scheduler::new();
    scheduler
        .every(config.page_load_interval, Box::new(page_load))
        .every(config.speedtest_interval, Box::new(speedtest));

    let addr = config.metrics_addr();
    let listener = http_server::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
    tracing::info!(%addr, "serving metrics on http://{}/metrics", addr);
    tokio::spawn(http_server::serve(listener, metrics));

    tokio::spawn(async {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl+C, exiting");
                std::process::exit(0);
            }
            Err(err) => {
                tracing::warn!(error = %err, "unable to listen for shutdown signal");
            }
        }
    });

    scheduler.run(config.tick_interval).await;

    Ok(())
}
