use async_trait::async_trait;
use std::sync::Arc;

use crate::gauge::{GaugeStore, WatchdogGauge, FAILURE_SENTINEL};
use crate::probe::{Probe, SpeedReading};
use crate::scheduler::Job;

/// Writes each page load reading, or the sentinel, to the page load gauge.
pub struct PageLoadJob<P> {
    probe: P,
    store: Arc<dyn GaugeStore>,
}

impl<P> PageLoadJob<P>
where
    P: Probe<Reading = f64>,
{
    pub fn new(probe: P, store: Arc<dyn GaugeStore>) -> Self {
        Self { probe, store }
    }
}

#[async_trait]
impl<P> Job for PageLoadJob<P>
where
    P: Probe<Reading = f64>,
{
    fn name(&self) -> &str {
        "page_load"
    }

    async fn run(&self) {
        tracing::info!(url = self.probe.label(), "running page load time test");

        let value = match self.probe.measure().await {
            Ok(seconds) => {
                tracing::debug!(url = self.probe.label(), seconds, "page load finished");
                seconds
            }
            Err(err) => {
                tracing::error!(url = self.probe.label(), error = %err, "page load test failed");
                FAILURE_SENTINEL
            }
        };

        self.store.set(WatchdogGauge::PageLoad, value);
    }
}

/// Writes download and upload together from one speed test pass.
pub struct SpeedTestJob<P> {
    probe: P,
    store: Arc<dyn GaugeStore>,
}

impl<P> SpeedTestJob<P>
where
    P: Probe<Reading = SpeedReading>,
{
    pub fn new(probe: P, store: Arc<dyn GaugeStore>) -> Self {
        Self { probe, store }
    }
}

#[async_trait]
impl<P> Job for SpeedTestJob<P>
where
    P: Probe<Reading = SpeedReading>,
{
    fn name(&self) -> &str {
        "speedtest"
    }

    async fn run(&self) {
        tracing::info!("running internet speed test");

        let (download, upload) = match self.probe.measure().await {
            Ok(reading) => {
                tracing::info!(
                    download_mb = reading.download_mb,
                    upload_mb = reading.upload_mb,
                    "speed test finished"
                );
                (reading.download_mb, reading.upload_mb)
            }
            Err(err) => {
                tracing::error!(error = %err, "speed test failed");
                (FAILURE_SENTINEL, FAILURE_SENTINEL)
            }
        };

        self.store.set(WatchdogGauge::SpeedtestDownload, download);
        self.store.set(WatchdogGauge::SpeedtestUpload, upload);
    }
}

/// Runs every job once, in order, before anything is scheduled or served.
pub async fn hydrate(jobs: &[&dyn Job]) {
    for job in jobs {
        job.run().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::WatchdogMetrics;
    use crate::probe::{ProbeError, SpeedTestStage};
    use crate::scheduler::Scheduler;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    /// Replays queued outcomes, one per call
    struct ScriptedProbe<R> {
        outcomes: Mutex<Vec<Result<R, ProbeError>>>,
    }

    impl<R> ScriptedProbe<R> {
        fn new(mut outcomes: Vec<Result<R, ProbeError>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl<R: Send + 'static> Probe for ScriptedProbe<R> {
        type Reading = R;

        fn label(&self) -> &str {
            "scripted"
        }

        async fn measure(&self) -> Result<R, ProbeError> {
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProbeError::transport("script exhausted")))
        }
    }

    /// Always fails like an unreachable host, remembering when it was called
    struct UnreachableProbe {
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Probe for UnreachableProbe {
        type Reading = f64;

        fn label(&self) -> &str {
            "http://unreachable.invalid/"
        }

        async fn measure(&self) -> Result<f64, ProbeError> {
            self.calls.lock().unwrap().push(Instant::now());
            Err(ProbeError::transport("dns error: failed to lookup address"))
        }
    }

    fn store() -> Arc<WatchdogMetrics> {
        Arc::new(WatchdogMetrics::new().unwrap())
    }

    fn reading(download_mb: f64, upload_mb: f64) -> SpeedReading {
        SpeedReading {
            download_mb,
            upload_mb,
        }
    }

    #[tokio::test]
    async fn page_load_failure_writes_sentinel_then_recovers() {
        let metrics = store();
        let job = PageLoadJob::new(
            ScriptedProbe::new(vec![
                Err(ProbeError::transport("dns failure")),
                Ok(0.31),
            ]),
            metrics.clone(),
        );

        job.run().await;
        assert_eq!(metrics.read_all()["watchdog_pageload_in_sec"], -1.0);

        job.run().await;
        assert_eq!(metrics.read_all()["watchdog_pageload_in_sec"], 0.31);
    }

    #[tokio::test]
    async fn speed_pair_always_comes_from_one_pass() {
        let metrics = store();
        let job = SpeedTestJob::new(
            ScriptedProbe::new(vec![
                Ok(reading(50.0, 9.5)),
                Err(ProbeError::measurement(SpeedTestStage::Upload, "reset")),
                Ok(reading(48.12, 10.0)),
                Err(ProbeError::measurement(SpeedTestStage::ServerDiscovery, "none")),
            ]),
            metrics.clone(),
        );
        let expected = [(50.0, 9.5), (-1.0, -1.0), (48.12, 10.0), (-1.0, -1.0)];

        for (download, upload) in expected {
            job.run().await;
            let values = metrics.read_all();
            assert_eq!(values["watchdog_speedtest_download_mb"], download);
            assert_eq!(values["watchdog_speedtest_upload_mb"], upload);
        }
    }

    #[tokio::test]
    async fn hydrate_leaves_no_gauge_unset() {
        let metrics = store();
        let page = PageLoadJob::new(
            ScriptedProbe::<f64>::new(vec![Err(ProbeError::transport("refused"))]),
            metrics.clone(),
        );
        let speed = SpeedTestJob::new(
            ScriptedProbe::new(vec![Ok(reading(50.0, 20.0))]),
            metrics.clone(),
        );

        let jobs: [&dyn Job; 2] = [&page, &speed];
        hydrate(&jobs).await;

        let values = metrics.read_all();
        assert!(values.values().all(|v| !v.is_nan()));
        assert_eq!(values["watchdog_pageload_in_sec"], -1.0);
        assert_eq!(values["watchdog_speedtest_download_mb"], 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_page_stays_failed_and_is_retried_every_period() {
        let metrics = store();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let job = PageLoadJob::new(
            UnreachableProbe {
                calls: calls.clone(),
            },
            metrics.clone(),
        );
        let page_load = || metrics.read_all()["watchdog_pageload_in_sec"];
        let start = Instant::now();

        let jobs: [&dyn Job; 1] = [&job];
        hydrate(&jobs).await;
        assert_eq!(page_load(), -1.0);
        assert_eq!(calls.lock().unwrap().len(), 1);

        let mut scheduler = Scheduler::new();
        scheduler.every(Duration::from_secs(5), Box::new(job));
        let tick = Duration::from_secs(1);

        // between attempts nothing runs and the sentinel holds
        let _ = timeout(Duration::from_millis(3500), scheduler.run(tick)).await;
        assert_eq!(page_load(), -1.0);
        assert_eq!(calls.lock().unwrap().len(), 1);

        let _ = timeout(Duration::from_millis(2500), scheduler.run(tick)).await;
        assert_eq!(page_load(), -1.0);
        assert_eq!(calls.lock().unwrap().len(), 2);

        let _ = timeout(Duration::from_millis(5500), scheduler.run(tick)).await;
        assert_eq!(page_load(), -1.0);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], start);
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(5), "gap was {:?}", gap);
            assert!(gap <= Duration::from_secs(6), "gap was {:?}", gap);
        }
    }
}
