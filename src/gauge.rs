use std::collections::BTreeMap;

/// Value written when the most recent probe attempt failed.
pub const FAILURE_SENTINEL: f64 = -1.0;

/// The three gauges exported by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchdogGauge {
    SpeedtestUpload,
    SpeedtestDownload,
    PageLoad,
}

impl WatchdogGauge {
    pub const ALL: [WatchdogGauge; 3] = [
        WatchdogGauge::SpeedtestUpload,
        WatchdogGauge::SpeedtestDownload,
        WatchdogGauge::PageLoad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WatchdogGauge::SpeedtestUpload => "watchdog_speedtest_upload_mb",
            WatchdogGauge::SpeedtestDownload => "watchdog_speedtest_download_mb",
            WatchdogGauge::PageLoad => "watchdog_pageload_in_sec",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            WatchdogGauge::SpeedtestUpload => "Speedtest upload speed in MB.",
            WatchdogGauge::SpeedtestDownload => "Speedtest download speed in MB.",
            WatchdogGauge::PageLoad => "Google.com page load in seconds.",
        }
    }
}

/// Shared register of the latest probe readings.
///
/// Writers are the scheduler's probe jobs, readers are scrape handlers
/// running on other tasks. A gauge that has never been written reads as NaN.
pub trait GaugeStore: Send + Sync {
    fn set(&self, gauge: WatchdogGauge, value: f64);

    /// Snapshot of every gauge keyed by its exported name.
    fn read_all(&self) -> BTreeMap<&'static str, f64>;
}
