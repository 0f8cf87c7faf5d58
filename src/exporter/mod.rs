mod metric;
mod runner;

pub use metric::http_server;
pub use metric::WatchdogMetrics;
pub use runner::{hydrate, PageLoadJob, SpeedTestJob};
