//! Ships structured records to a per-stream log service.
//!
//! A bulk of [`record::Record`]s flows through:
//! - the [`batcher::Batcher`], which resolves each record's destination from the group and
//!   stream templates and cuts time-ordered, size-bounded batches,
//! - the [`shipper::Shipper`], which delivers the batches of different destinations
//!   concurrently and the batches of one destination in order,
//! - the [`delivery::DeliveryEngine`], which puts a batch and recovers from missing
//!   destinations, stale sequence tokens and throttling within a bounded budget.
//!
//! Every put is paced by one shared [`governor::RateGovernor`] and the last token of each
//! destination is kept in a [`tokens::SequenceTokenStore`].

pub use self::error::{Error, Result};

pub mod batcher;
pub mod config;
pub mod delivery;
pub mod destination;
mod error;
pub mod governor;
pub mod record;
pub mod shipper;
pub mod template;
pub mod tokens;

pub use crate::config::{Settings, ShipperConfig};
pub use crate::destination::DestinationKey;
pub use crate::record::Record;
pub use crate::shipper::{BatchFailure, ShipReport, Shipper};
pub use crate::tokens::SequenceTokenStore;
