use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::Client;

use crate::{Error, Result};

pub const CLOUDWATCH_DEFAULT_REGION: &str = "us-west-2";

/// Where to find CloudWatch Logs. Credentials come from the default AWS provider chain.
#[derive(Clone, Debug, PartialEq)]
pub struct CloudWatchConfig {
    pub region: String,
    /// Overrides the regional endpoint, e.g. a local emulator.
    pub endpoint_url: Option<String>,
}

impl Default for CloudWatchConfig {
    fn default() -> Self {
        Self {
            region: CLOUDWATCH_DEFAULT_REGION.to_string(),
            endpoint_url: None,
        }
    }
}

impl CloudWatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(Error::InvalidConfig("region is required".to_string()));
        }
        if let Some(endpoint_url) = &self.endpoint_url
            && !(endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://"))
        {
            return Err(Error::InvalidConfig(format!(
                "endpoint_url must be an http(s) URL, got {endpoint_url}"
            )));
        }
        Ok(())
    }
}

/// Creates a CloudWatch Logs client for the configured region (falling back to the default
/// provider chain, then to [`CLOUDWATCH_DEFAULT_REGION`]).
pub async fn create_cloudwatch_client(config: &CloudWatchConfig) -> Result<Client> {
    config.validate()?;

    tracing::info!(
        region = config.region.as_str(),
        endpoint_url = ?config.endpoint_url,
        "Creating CloudWatch Logs client"
    );

    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()))
        .or_default_provider()
        .or_else(Region::new(CLOUDWATCH_DEFAULT_REGION));

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let Some(endpoint_url) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    let shared_config = loader.load().await;
    Ok(Client::new(&shared_config))
}
