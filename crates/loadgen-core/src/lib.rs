//! Load-generation engine for Kafka REST proxy style ingestion endpoints.
//!
//! A run is planned into batches ([`plan`]), bodies are built by the
//! [`payload`] generator, every send holds an [`admission`] permit for its
//! whole life, the [`transport`] applies the retry policy and feeds the
//! [`stats`] aggregator, and the [`runner`] ties it together into a
//! [`report::RunReport`].

pub mod admission;
pub mod config;
pub mod error;
pub mod payload;
pub mod plan;
pub mod rate_limiter;
pub mod report;
pub mod runner;
pub mod stats;
pub mod transport;

pub use admission::*;
pub use config::*;
pub use error::{LoadError, Result};
pub use payload::*;
pub use plan::*;
pub use rate_limiter::*;
pub use report::*;
pub use runner::*;
pub use stats::*;
pub use transport::*;
