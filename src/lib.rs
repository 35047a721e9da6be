pub mod catalog;
pub mod core;
pub mod observability;
pub mod retrieval;
pub mod storage;
