//! Notification dispatch engine.
//!
//! A scheduling pass streams due registrations, gives each a fresh delivery
//! slot, and hands it to the [`dispatch::DispatchEngine`], which paces sends
//! through a [`rate_limiter::RateLimiter`] and an
//! [`admission::AdmissionController`], walks the endpoint chain with a
//! [`failover::FailoverPolicy`] and records the result through the
//! [`recorder::OutcomeRecorder`].

pub mod admission;
pub mod dispatch;
pub mod failover;
pub mod memory;
pub mod provider;
pub mod quiescence;
pub mod rate_limiter;
pub mod recorder;
pub mod reschedule;
pub mod scheduler;
pub mod store;
