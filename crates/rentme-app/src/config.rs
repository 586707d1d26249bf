//! Process configuration read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Where aggregates, outbox rows, and idempotency records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    Postgres {
        url: String,
        max_connections: u32,
    },
}

/// Everything the process reads at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    /// Empty means "log instead of publishing".
    pub kafka_brokers: Vec<String>,
    pub topic_prefix: String,
    pub outbox_source: String,
    pub poll_interval: Duration,
    pub workers: usize,
    pub worker_id: String,
    pub retry_backoff: Vec<Duration>,
    pub max_format_attempts: i32,
    pub claim_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub command_timeout: Duration,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for a missing required variable or a
    /// value that does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let storage = match var("STORAGE").as_deref().map(str::trim) {
            None | Some("memory") => StorageConfig::Memory,
            Some("postgres") => StorageConfig::Postgres {
                url: var("DATABASE_URL").ok_or_else(|| {
                    AppError::Config("DATABASE_URL must be set when STORAGE=postgres".into())
                })?,
                max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            Some(other) => {
                return Err(AppError::Config(format!(
                    "STORAGE must be `memory` or `postgres`, got `{other}`"
                )));
            }
        };

        let kafka_brokers = var("KAFKA_BROKERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|broker| !broker.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let retry_backoff = match var("RETRY_BACKOFF_MS") {
            Some(raw) => raw
                .split(',')
                .map(|part| {
                    part.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| {
                        AppError::Config(format!("RETRY_BACKOFF_MS entry `{part}`: {e}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30),
            ],
        };

        let workers: usize = parse_or(&var, "OUTBOX_WORKERS", 1)?;
        if workers == 0 {
            return Err(AppError::Config("OUTBOX_WORKERS must be at least 1".into()));
        }

        Ok(Self {
            storage,
            kafka_brokers,
            topic_prefix: var("KAFKA_TOPIC_PREFIX").unwrap_or_default(),
            outbox_source: var("OUTBOX_SOURCE").unwrap_or_else(|| "app://rentme".to_owned()),
            poll_interval: Duration::from_millis(parse_or(&var, "OUTBOX_POLL_INTERVAL_MS", 500)?),
            workers,
            worker_id: var("OUTBOX_WORKER_ID")
                .unwrap_or_else(|| format!("relay-{}", uuid::Uuid::new_v4())),
            retry_backoff,
            max_format_attempts: parse_or(&var, "OUTBOX_MAX_FORMAT_ATTEMPTS", 3)?,
            claim_timeout: Duration::from_millis(parse_or(&var, "OUTBOX_CLAIM_TIMEOUT_MS", 60_000)?),
            idempotency_ttl: Duration::from_secs(parse_or(&var, "IDEMPOTENCY_TTL_SECS", 604_800)?),
            command_timeout: Duration::from_millis(parse_or(&var, "COMMAND_TIMEOUT_MS", 5_000)?),
        })
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name} must be a valid number: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_select_memory_storage_and_log_producer() {
        // Act
        let config = config(&[]).unwrap();

        // Assert
        assert_eq!(config.storage, StorageConfig::Memory);
        assert!(config.kafka_brokers.is_empty());
        assert_eq!(config.outbox_source, "app://rentme");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.workers, 1);
        assert!(config.worker_id.starts_with("relay-"));
        assert_eq!(
            config.retry_backoff,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30)
            ]
        );
        assert_eq!(config.max_format_attempts, 3);
        assert_eq!(config.idempotency_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_postgres_storage_requires_database_url() {
        let result = config(&[("STORAGE", "postgres")]);

        assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("DATABASE_URL")));
    }

    #[test]
    fn test_postgres_storage_reads_pool_size() {
        let config = config(&[
            ("STORAGE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/rentme"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();

        assert_eq!(
            config.storage,
            StorageConfig::Postgres {
                url: "postgres://localhost/rentme".into(),
                max_connections: 4,
            }
        );
    }

    #[test]
    fn test_lists_are_split_on_commas() {
        let config = config(&[
            ("KAFKA_BROKERS", "k1:9092, k2:9092,"),
            ("RETRY_BACKOFF_MS", "100, 200"),
        ])
        .unwrap();

        assert_eq!(config.kafka_brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(
            config.retry_backoff,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_unparseable_number_names_the_variable() {
        let result = config(&[("OUTBOX_POLL_INTERVAL_MS", "soon")]);

        assert!(
            matches!(result, Err(AppError::Config(msg)) if msg.starts_with("OUTBOX_POLL_INTERVAL_MS"))
        );
    }

    #[test]
    fn test_unknown_storage_is_rejected() {
        assert!(config(&[("STORAGE", "redis")]).is_err());
        assert!(config(&[("OUTBOX_WORKERS", "0")]).is_err());
    }
}
