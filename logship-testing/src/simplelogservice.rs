//! Simple log service implementation for testing.
//!
//! This module provides an in-memory log service that implements the `LogService` trait from
//! `logship_shared::logs`. It follows the protocol of the real service closely enough to drive
//! every recovery path of delivery: writes to a missing group or stream fail with `NotFound`,
//! a write presenting anything but the stream's current token fails with `InvalidToken`, and
//! creating something twice fails with `AlreadyExists`.
//!
//! # Features
//! - Full `LogService` trait implementation
//! - Global, monotonically increasing sequence tokens
//! - A journal of every request in arrival order
//! - Error injection (throttling, hard failures, not found, stale tokens)
//! - Latency injection for puts and creates
//!
//! # Example
//! ```ignore
//! use logship_testing::simplelogservice::SimpleLogService;
//! use logship_shared::logs::{InputLogEvent, LogService};
//!
//! let service = SimpleLogService::new();
//! service.create_group_now("app");
//! service.create_stream_now("app", "host-a");
//!
//! let token = service
//!     .put_log_events("app", "host-a", &[InputLogEvent::new(1, "hi")], None)
//!     .await
//!     .unwrap();
//!
//! // Next put will be throttled
//! service.error_injector().throttle_puts(1);
//! ```

/// Error injection controller.
mod error_injector;
/// Core service implementation.
mod store;

// Re-exports
pub use error_injector::LogErrorInjector;
pub use store::{LogRequest, LogState, SimpleLogService, StreamState};
