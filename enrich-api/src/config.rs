use enrich_common::config::{BrokerConfig, EnvMsDuration, PersistenceConfig};
use enrich_worker::config::ConsumerConfig;
use envconfig::Envconfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub broker: BrokerConfig,

    #[envconfig(nested = true)]
    pub persistence: PersistenceConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "5000")]
    pub publish_timeout: EnvMsDuration,

    #[envconfig(default = "10")]
    pub max_delivery_attempts: i32,

    #[envconfig(default = "1000000")]
    pub max_body_size: usize,

    #[envconfig(default = "10")]
    pub concurrency_limit: usize,

    /// Run a consumer next to the HTTP server, so one process serves both roles.
    #[envconfig(default = "true")]
    pub consumer_enabled: bool,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
