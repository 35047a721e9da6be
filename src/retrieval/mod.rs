//! Turning a `(resource, time range)` request into an ordered run of bucket
//! instances: plan hits and gaps, fetch each gap once, align the response,
//! persist and cache.

pub mod engine;
pub mod locks;
pub mod planner;
pub mod reconcile;

pub use engine::{RetrievalEngine, RetrievalOutcome};
