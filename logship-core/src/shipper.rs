//! Ships one bulk of records at a time.
//!
//! The bulk is cut into batches, the batches of each destination are handed to their own task
//! and delivered one after the other, while different destinations proceed concurrently (up
//! to `max_concurrent_destinations` at once). A batch that cannot be delivered is logged and
//! reported; it does not stop the batches behind it.
use std::collections::HashMap;
use std::sync::Arc;

use logship_shared::logs::LogService;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::batcher::{Batch, Batcher};
use crate::config::ShipperConfig;
use crate::delivery::DeliveryEngine;
use crate::destination::DestinationKey;
use crate::error::Error;
use crate::governor::RateGovernor;
use crate::record::Record;
use crate::tokens::SequenceTokenStore;

/// A batch that was given up on.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub key: DestinationKey,
    pub events: usize,
    pub error: Error,
}

/// Outcome of shipping one bulk.
#[derive(Debug, Default, Clone)]
pub struct ShipReport {
    pub batches: usize,
    pub delivered_batches: usize,
    pub delivered_events: usize,
    pub failures: Vec<BatchFailure>,
}

impl ShipReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_events(&self) -> usize {
        self.failures.iter().map(|failure| failure.events).sum()
    }

    fn merge(&mut self, other: ShipReport) {
        self.batches += other.batches;
        self.delivered_batches += other.delivered_batches;
        self.delivered_events += other.delivered_events;
        self.failures.extend(other.failures);
    }
}

pub struct Shipper<S> {
    batcher: Batcher,
    engine: Arc<DeliveryEngine<S>>,
    max_concurrent: usize,
}

impl<S> Shipper<S>
where
    S: LogService + Sync + 'static,
{
    /// Validates `config` and wires up a shipper writing through `service`. `tokens` may be
    /// shared with other shippers writing to the same account.
    pub fn new(config: &ShipperConfig, service: S, tokens: SequenceTokenStore) -> Result<Self> {
        config.validate()?;
        let retry = config.delivery.retry.clone();
        let governor = Arc::new(RateGovernor::new(config.delivery.min_interval, retry.clone()));

        Ok(Self {
            batcher: Batcher::new(config)?,
            engine: Arc::new(DeliveryEngine::new(service, tokens, governor, retry)),
            max_concurrent: config.delivery.max_concurrent_destinations,
        })
    }

    pub fn tokens(&self) -> &SequenceTokenStore {
        self.engine.tokens()
    }

    /// Delivers `records` and reports what happened to each batch. Only a delivery task that
    /// died fails the whole call.
    pub async fn ship(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<ShipReport> {
        let mut report = ShipReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let records_count = records.len();
        let per_destination = group_by_destination(self.batcher.form_batches(records));
        debug!(
            records = records_count,
            destinations = per_destination.len(),
            "Formed batches"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for batches in per_destination {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Join(format!("failed to acquire semaphore: {e}")))?;
                Ok::<_, Error>(deliver_in_order(&engine, batches, &cancel).await)
            });
        }

        while let Some(task) = tasks.join_next().await {
            report.merge(task??);
        }

        info!(
            batches = report.batches,
            delivered_batches = report.delivered_batches,
            delivered_events = report.delivered_events,
            failed_batches = report.failures.len(),
            "Shipped bulk"
        );
        Ok(report)
    }
}

/// Splits batches into per-destination runs, keeping the order within each.
fn group_by_destination(batches: Vec<Batch>) -> Vec<Vec<Batch>> {
    let mut index: HashMap<DestinationKey, usize> = HashMap::new();
    let mut grouped: Vec<Vec<Batch>> = Vec::new();
    for batch in batches {
        match index.get(batch.key()) {
            Some(&slot) => {
                if let Some(run) = grouped.get_mut(slot) {
                    run.push(batch);
                }
            }
            None => {
                index.insert(batch.key().clone(), grouped.len());
                grouped.push(vec![batch]);
            }
        }
    }
    grouped
}

async fn deliver_in_order<S>(
    engine: &DeliveryEngine<S>,
    batches: Vec<Batch>,
    cancel: &CancellationToken,
) -> ShipReport
where
    S: LogService + Sync,
{
    let mut report = ShipReport::default();
    for batch in batches {
        report.batches += 1;
        let key = batch.key();
        match engine.deliver(&batch, cancel).await {
            Ok(_) => {
                report.delivered_batches += 1;
                report.delivered_events += batch.len();
            }
            Err(err) => {
                if matches!(err, Error::Cancelled) {
                    debug!(%key, events = batch.len(), "Delivery cancelled");
                } else {
                    error!(
                        group = key.group.as_str(),
                        stream = key.stream.as_str(),
                        events = batch.len(),
                        error = %err,
                        "Failed to deliver batch"
                    );
                }
                report.failures.push(BatchFailure {
                    key: key.clone(),
                    events: batch.len(),
                    error: err,
                });
            }
        }
    }
    report
}
