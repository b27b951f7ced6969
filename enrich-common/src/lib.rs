pub mod config;
pub mod metrics;
pub mod pgqueue;
pub mod publisher;
pub mod records;
pub mod retry;
pub mod shutdown;
pub mod store;
