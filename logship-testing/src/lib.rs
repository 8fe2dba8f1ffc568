//! Logship Testing Utilities.

/// In-memory log service for testing delivery.
pub mod simplelogservice;
