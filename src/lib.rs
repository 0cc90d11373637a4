//! Proxybench - periodic proxy latency sampling
//!
//! Measures how long it takes to fetch a set of origin URLs through remote
//! chained proxies, and hands each timing to a caller-supplied reporter.
//!
//! ## Features
//!
//! - Sampling rounds gated by a configurable rate, with a jittered period
//! - Run options refreshed from a remote JSON document
//! - TLS, obfs4 and KCP proxy protocols, picked at random per trial
//! - A one-shot local bridge per trial, so any HTTP client can use the proxy

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{BenchError, Result};
pub use models::{Overrides, ProxyEndpoint, Protocol, RunOptions, TrialContext};
pub use services::{Reporter, Scheduler, SchedulerHandle};
