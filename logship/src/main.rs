use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::path::PathBuf;

use clap::ArgMatches;
use logship_cloudwatch::client::{CLOUDWATCH_DEFAULT_REGION, CloudWatchConfig};
use logship_cloudwatch::logs::CloudWatchLogs;
use logship_core::config::ENV_CONFIG_OBJECT;
use logship_core::{SequenceTokenStore, Settings, Shipper, ShipperConfig};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cmdline;
mod ingest;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let settings = load_settings(&matches).await?;
    let config = ShipperConfig::try_from(&settings)?;
    let bulk_size = matches
        .get_one::<usize>("bulk-size")
        .copied()
        .unwrap_or(cmdline::DEFAULT_BULK_SIZE);

    let cloudwatch = CloudWatchConfig {
        region: settings
            .aws
            .region
            .clone()
            .unwrap_or_else(|| CLOUDWATCH_DEFAULT_REGION.to_string()),
        endpoint_url: settings.aws.endpoint_url.clone(),
    };
    let service = CloudWatchLogs::connect(&cloudwatch).await?;
    let shipper = Shipper::new(&config, service, SequenceTokenStore::new())?;
    info!(
        group = config.group_name_template.as_str(),
        stream = config.stream_name_template.as_str(),
        bulk_size,
        "Shipping records from stdin"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling delivery");
            shutdown.cancel();
        }
    });

    let mut reader = ingest::BulkReader::new(BufReader::new(tokio::io::stdin()), bulk_size);
    let (mut delivered_events, mut failed_batches, mut failed_events) = (0, 0, 0);
    loop {
        let bulk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            bulk = reader.next_bulk() => bulk?,
        };
        let Some(records) = bulk else {
            break;
        };

        let report = shipper.ship(records, &cancel).await?;
        delivered_events += report.delivered_events;
        failed_batches += report.failures.len();
        failed_events += report.failed_events();
    }

    info!(
        delivered_events,
        failed_batches,
        skipped_lines = reader.skipped(),
        "Input exhausted"
    );
    if cancel.is_cancelled() {
        warn!("Delivery was interrupted, input after the last bulk was not read");
    }
    if failed_batches > 0 {
        return Err(format!(
            "{failed_batches} batches ({failed_events} events) could not be delivered"
        )
        .into());
    }
    Ok(())
}

/// Reads the configuration document from `--config` or from [`ENV_CONFIG_OBJECT`], then applies
/// the command line overrides.
async fn load_settings(matches: &ArgMatches) -> Result<Settings, Box<dyn Error>> {
    let mut settings = if let Some(path) = matches.get_one::<PathBuf>("config") {
        let document = tokio::fs::read(path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Settings::from_json(&document)?
    } else if env::var(ENV_CONFIG_OBJECT).is_ok() {
        let vars: HashMap<String, String> = env::vars().collect();
        Settings::from_env(&vars)?
    } else {
        Settings::default()
    };

    apply_overrides(&mut settings, matches);
    Ok(settings)
}

fn apply_overrides(settings: &mut Settings, matches: &ArgMatches) {
    if let Some(group) = matches.get_one::<String>("log-group") {
        settings.log_group_name = group.clone();
    }
    if let Some(stream) = matches.get_one::<String>("log-stream") {
        settings.log_stream_name = stream.clone();
    }
    if let Some(template) = matches.get_one::<String>("message-template") {
        settings.message_template = template.clone();
    }
    if let Some(region) = matches.get_one::<String>("region") {
        settings.aws.region = Some(region.clone());
    }
    if let Some(endpoint_url) = matches.get_one::<String>("endpoint-url") {
        settings.aws.endpoint_url = Some(endpoint_url.clone());
    }
}
