//! Run options: defaults plus periodic remote updates
//!
//! The current options live behind an `ArcSwap` so a round in progress keeps
//! the snapshot it started with while a refresh publishes a new one.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use reqwest::StatusCode;
use tracing::{debug, error, info, instrument};

use crate::error::{BenchError, Result};
use crate::models::{Overrides, RunOptions};

/// Time limit for fetching the remote options document
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ConfigManager {
    current: ArcSwap<RunOptions>,
    overrides: Overrides,
    client: reqwest::Client,
}

impl ConfigManager {
    pub fn new(options: RunOptions, overrides: Overrides) -> Result<Self> {
        let options = options.with_defaults(&overrides);
        let client = reqwest::Client::builder().timeout(UPDATE_TIMEOUT).build()?;

        Ok(Self {
            current: ArcSwap::from_pointee(options),
            overrides,
            client,
        })
    }

    /// Snapshot of the options in effect
    pub fn current(&self) -> Arc<RunOptions> {
        self.current.load_full()
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    /// Fetch replacement options from `options.update_url`.
    ///
    /// Any failure is logged and `options` comes back unchanged.
    pub async fn fetch_update(&self, options: &Arc<RunOptions>) -> Arc<RunOptions> {
        if options.update_url.is_empty() {
            debug!("No update URL configured, keeping current options");
            return options.clone();
        }

        match self.try_fetch(&options.update_url).await {
            Ok(updated) => {
                info!(
                    "Fetched options from {}: {} urls, {} proxies, sample rate {}",
                    options.update_url,
                    updated.urls.len(),
                    updated.proxies.len(),
                    updated.sample_rate
                );
                Arc::new(updated)
            }
            Err(e) => {
                error!(
                    "Unable to fetch updated options from {}: {}",
                    options.update_url, e
                );
                options.clone()
            }
        }
    }

    /// Fetch an update and publish it as the current options
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Arc<RunOptions> {
        let current = self.current();
        let updated = self.fetch_update(&current).await;
        if !Arc::ptr_eq(&current, &updated) {
            self.current.store(updated.clone());
        }
        updated
    }

    async fn try_fetch(&self, url: &str) -> Result<RunOptions> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BenchError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let options: RunOptions = serde_json::from_slice(&body)?;
        Ok(options.with_defaults(&self.overrides))
    }
}
