use enrich_common::config::{BrokerConfig, EnvMsDuration, NonEmptyString, PersistenceConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub broker: BrokerConfig,

    #[envconfig(nested = true)]
    pub persistence: PersistenceConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    #[envconfig(default = "enrich-consumer")]
    pub consumer_tag: NonEmptyString,

    #[envconfig(default = "100")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "1")]
    pub prefetch_count: usize,

    #[envconfig(default = "http://localhost:8082/api/v1/is-document-valid")]
    pub document_validation_url: String,

    #[envconfig(default = "http://localhost:8081/api/v1/address")]
    pub address_service_url: String,

    #[envconfig(default = "30000")]
    pub external_api_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "300000")]
    pub maximum_interval: EnvMsDuration,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3301");
        assert_eq!(config.broker.queue_name.as_str(), "user_data_queue");
        assert_eq!(config.consumer.prefetch_count, 1);
        assert_eq!(
            config.consumer.external_api_timeout,
            EnvMsDuration(time::Duration::from_secs(30))
        );
        assert_eq!(
            config.consumer.document_validation_url,
            "http://localhost:8082/api/v1/is-document-valid"
        );
        assert_eq!(
            config.consumer.address_service_url,
            "http://localhost:8081/api/v1/address"
        );
        assert_eq!(config.consumer.retry_policy.backoff_coefficient, 2);
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("QUEUE_NAME".to_owned(), "users".to_owned()),
            ("PREFETCH_COUNT".to_owned(), "8".to_owned()),
            ("INITIAL_INTERVAL".to_owned(), "50".to_owned()),
        ]);

        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.broker.queue_name.as_str(), "users");
        assert_eq!(config.consumer.prefetch_count, 8);
        assert_eq!(
            config.consumer.retry_policy.initial_interval,
            EnvMsDuration(time::Duration::from_millis(50))
        );
    }

    #[test]
    fn test_empty_queue_name_is_rejected() {
        let env = HashMap::from([("QUEUE_NAME".to_owned(), "".to_owned())]);

        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
