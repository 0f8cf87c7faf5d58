use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::{Duration, Instant};

use super::{Probe, ProbeError};

const MAX_REDIRECTS: usize = 10;

/// Times one GET of `url`, redirects included, until the body is fully read.
#[derive(Debug, Clone)]
pub struct PageLoadProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl PageLoadProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout {
                after: self.timeout,
            }
        } else {
            ProbeError::transport(err)
        }
    }
}

#[async_trait]
impl Probe for PageLoadProbe {
    /// Elapsed seconds
    type Reading = f64;

    fn label(&self) -> &str {
        &self.url
    }

    async fn measure(&self) -> Result<f64, ProbeError> {
        let start = Instant::now();

        // status codes are deliberately ignored, only transport errors fail the probe
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(start.elapsed().as_secs_f64())
    }
}
