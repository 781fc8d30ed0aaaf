//! Durable queue of transiently-failed mutations: exponential backoff
//! with jitter, dead-letter escalation, and a cooperative retry worker.

#![warn(missing_docs)]

pub mod backoff;
pub mod queue;
pub mod retry;
pub mod worker;

pub use backoff::{backoff_ms, backoff_with_jitter_ms};
pub use queue::FallbackQueue;
pub use retry::RetryHandler;
pub use worker::Worker;
