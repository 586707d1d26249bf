//! Broker producers.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::error::RelayError;

/// At-least-once message send.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Publishes `payload` to `topic`, partitioned by `key`.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<(), RelayError>;
}

/// Logs each message instead of sending it. Used when no broker is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProducer;

#[async_trait]
impl Producer for LoggingProducer {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<(), RelayError> {
        info!(
            topic,
            key,
            bytes = payload.len(),
            headers = headers.len(),
            body = %String::from_utf8_lossy(payload),
            "event published to log"
        );
        Ok(())
    }
}

/// One message accepted by a [`MemoryProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

/// Keeps published messages in process, in publish order.
#[derive(Debug, Default)]
pub struct MemoryProducer {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl MemoryProducer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<(), RelayError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishedMessage {
                topic: topic.to_owned(),
                key: key.to_owned(),
                payload: payload.to_vec(),
                headers: headers.clone(),
            });
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use kafka::KafkaProducer;

#[cfg(feature = "kafka")]
mod kafka {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::message::{Header, OwnedHeaders};
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;
    use tracing::{debug, error};

    use super::Producer;
    use crate::error::RelayError;

    /// Kafka producer with `acks=all` and idempotent delivery enabled.
    pub struct KafkaProducer {
        producer: FutureProducer,
        timeout: Duration,
    }

    impl KafkaProducer {
        /// Connects to a comma-separated broker list.
        ///
        /// # Errors
        ///
        /// [`RelayError::Publish`] if the client cannot be created.
        pub fn new(brokers: &str, timeout: Duration) -> Result<Self, RelayError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("acks", "all")
                .set("enable.idempotence", "true")
                .set("message.timeout.ms", timeout.as_millis().to_string())
                .create()
                .map_err(|e| RelayError::Publish {
                    topic: String::new(),
                    reason: format!("cannot create Kafka producer: {e}"),
                })?;
            Ok(Self { producer, timeout })
        }
    }

    #[async_trait]
    impl Producer for KafkaProducer {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
            headers: &BTreeMap<String, String>,
        ) -> Result<(), RelayError> {
            let owned = headers
                .iter()
                .fold(OwnedHeaders::new(), |acc, (name, value)| {
                    acc.insert(Header {
                        key: name,
                        value: Some(value.as_bytes()),
                    })
                });
            let record = FutureRecord::to(topic)
                .key(key)
                .payload(payload)
                .headers(owned);
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    debug!(topic, partition, offset, "event published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    error!(topic, error = %kafka_error, "publish failed");
                    Err(RelayError::Publish {
                        topic: topic.to_owned(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_producer_keeps_messages_in_order() {
        // Arrange
        let producer = MemoryProducer::new();
        let headers = BTreeMap::new();

        // Act
        producer.publish("a.events.v1", "k1", b"1", &headers).await.unwrap();
        producer.publish("b.events.v1", "k2", b"2", &headers).await.unwrap();

        // Assert
        let topics: Vec<String> = producer.messages().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["a.events.v1", "b.events.v1"]);
    }

    #[tokio::test]
    async fn test_logging_producer_always_succeeds() {
        let result = LoggingProducer
            .publish("booking.events.v1", "b1", b"{}", &BTreeMap::new())
            .await;

        assert!(result.is_ok());
    }
}
