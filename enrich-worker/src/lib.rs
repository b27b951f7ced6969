pub mod clients;
pub mod config;
pub mod consumer;
pub mod error;
pub mod pipeline;

#[cfg(test)]
mod test_utils;
