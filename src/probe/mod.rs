mod page_load;
mod speedtest;

pub use page_load::PageLoadProbe;
pub use speedtest::{HttpSpeedTest, SpeedReading, SpeedServer, SpeedTestProbe};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stage of a speed test pass at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTestStage {
    ServerDiscovery,
    Download,
    Upload,
}

impl fmt::Display for SpeedTestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            SpeedTestStage::ServerDiscovery => "server discovery",
            SpeedTestStage::Download => "download",
            SpeedTestStage::Upload => "upload",
        };
        f.write_str(stage)
    }
}

/// Why a probe produced no reading
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Any error while timing the page load
    #[error("transport error: {0}")]
    Transport(String),

    /// Any error while running the speed test
    #[error("{stage} failed: {reason}")]
    Measurement { stage: SpeedTestStage, reason: String },

    #[error("probe timed out after {after:?}")]
    Timeout { after: Duration },
}

impl ProbeError {
    pub fn transport<E: fmt::Display>(err: E) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn measurement<E: fmt::Display>(stage: SpeedTestStage, err: E) -> Self {
        Self::Measurement {
            stage,
            reason: err.to_string(),
        }
    }
}

/// A single measurement that either yields a reading or says why it couldn't.
#[async_trait]
pub trait Probe: Send + Sync {
    type Reading: Send;

    /// Short description used in log lines
    fn label(&self) -> &str;

    async fn measure(&self) -> Result<Self::Reading, ProbeError>;
}
