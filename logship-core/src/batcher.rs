//! Turns a bulk of records into ordered, size-bounded batches, one destination per batch.
//!
//! All records are sorted by timestamp first (stable, so ties keep their arrival order), then
//! grouped by destination and greedily packed. A batch is closed when the next event would
//! bring it to or past the byte ceiling, when it holds the maximum number of events, or when
//! the next event is further than the allowed span from the first. An event that is too large
//! on its own still gets a batch of its own and the service decides what to make of it.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::mem;

use logship_shared::logs::InputLogEvent;

use crate::Result;
use crate::config::{BatchConfig, ShipperConfig};
use crate::destination::{DestinationKey, Destinations};
use crate::record::Record;
use crate::template::Template;

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    key: DestinationKey,
    events: Vec<InputLogEvent>,
    /// Sum of message bytes plus the per-event overhead.
    size_bytes: usize,
}

impl Batch {
    fn new(key: DestinationKey) -> Self {
        Self {
            key,
            events: Vec::new(),
            size_bytes: 0,
        }
    }

    fn push(&mut self, event: InputLogEvent, cost: usize) {
        self.size_bytes += cost;
        self.events.push(event);
    }

    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    pub fn events(&self) -> &[InputLogEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn first_timestamp(&self) -> Option<i64> {
        self.events.first().map(|event| event.timestamp)
    }
}

pub struct Batcher {
    destinations: Destinations,
    message: Option<Template>,
    config: BatchConfig,
}

impl Batcher {
    pub fn new(config: &ShipperConfig) -> Result<Self> {
        Ok(Self {
            destinations: Destinations::new(
                &config.group_name_template,
                &config.stream_name_template,
            )?,
            message: config
                .message_template
                .as_deref()
                .filter(|template| !template.is_empty())
                .map(Template::parse)
                .transpose()?,
            config: config.batch.clone(),
        })
    }

    /// Destinations appear in the order their first record appears in time; within a
    /// destination batches are in delivery order.
    pub fn form_batches(&self, mut records: Vec<Record>) -> Vec<Batch> {
        records.sort_by_key(Record::timestamp);

        let mut order = Vec::new();
        let mut grouped: HashMap<DestinationKey, Vec<InputLogEvent>> = HashMap::new();
        for record in &records {
            let event = InputLogEvent::new(record.timestamp_millis(), self.message(record));
            match grouped.entry(self.destinations.resolve(record)) {
                Entry::Occupied(mut events) => events.get_mut().push(event),
                Entry::Vacant(slot) => {
                    order.push(slot.key().clone());
                    slot.insert(vec![event]);
                }
            }
        }

        let mut batches = Vec::new();
        for key in order {
            if let Some(events) = grouped.remove(&key) {
                self.pack(key, events, &mut batches);
            }
        }
        batches
    }

    fn message(&self, record: &Record) -> String {
        match (&self.message, record.rendered_message()) {
            (Some(template), _) => template.render(record),
            (None, Some(rendered)) => rendered.to_string(),
            (None, None) => record.canonical_json(),
        }
    }

    fn pack(&self, key: DestinationKey, events: Vec<InputLogEvent>, batches: &mut Vec<Batch>) {
        let mut current = Batch::new(key.clone());
        for event in events {
            let cost = event.message.len() + self.config.per_event_overhead_bytes;
            if !current.is_empty() && !self.fits(&current, &event, cost) {
                batches.push(mem::replace(&mut current, Batch::new(key.clone())));
            }
            current.push(event, cost);
        }
        if !current.is_empty() {
            batches.push(current);
        }
    }

    fn fits(&self, batch: &Batch, event: &InputLogEvent, cost: usize) -> bool {
        let span_ms = i64::try_from(self.config.max_span.as_millis()).unwrap_or(i64::MAX);
        batch.size_bytes + cost < self.config.max_size_bytes
            && batch.len() < self.config.max_events
            && batch
                .first_timestamp()
                .is_none_or(|first| event.timestamp.saturating_sub(first) <= span_ms)
    }
}
