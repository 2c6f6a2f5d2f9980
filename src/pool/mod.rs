//! Proxy pool core
//!
//! Descriptor parsing, candidate selection, health bookkeeping and the
//! management surface built on top of a [`ProxyStore`](crate::repository::ProxyStore).

pub mod descriptor;
pub mod manager;
pub mod selector;
pub mod tracker;

pub use descriptor::{parse_batch, parse_line, ParsedBatch};
pub use manager::{IngestSummary, PoolManager};
pub use selector::{CandidateSelector, ProxySelector, RandomSource, SeededRandom, ThreadRandom};
pub use tracker::HealthTracker;
