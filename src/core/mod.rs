pub mod config;
pub mod error;
pub mod shutdown;
pub mod time;
pub mod types;
