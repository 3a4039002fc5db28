//! Kafka-backed queue implementation.
//!
//! Publishing is idempotent and keyed by URL id, so the broker keeps per-URL
//! order even across producer retries. The consumer runs with auto-commit
//! disabled; the sink commits explicitly after a batch has been handed to
//! the persistence pipeline, which gives at-least-once delivery.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::config::QueueConfig;

use super::{Delivery, QueueConsumer, QueueError, QueuePublisher, QueueResult};

/// Broker-side timeout for a single produce request.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

fn client_config(config: &QueueConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.brokers);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        client
            .set("security.protocol", "sasl_ssl")
            .set("sasl.mechanisms", "SCRAM-SHA-256")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    if let Some(ca_file) = &config.ca_file {
        client.set("ssl.ca.location", ca_file.display().to_string());
    }

    client
}

/// Producer half, used by the checker daemon.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let producer: FutureProducer = client_config(config)
            // Idempotent producer: broker-side retries cannot reorder
            // records within a partition.
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?;

        info!(
            "kafka publisher ready (brokers: {}, topic: {})",
            config.brokers, config.topic
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl QueuePublisher for KafkaPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> QueueResult<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| QueueError::PublishFailed(e.to_string()))
    }
}

/// Consumer half, used by the sink daemon.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?;

        info!(
            "kafka consumer ready (brokers: {}, topic: {}, group: {})",
            config.brokers, config.topic, config.group
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl QueueConsumer for KafkaConsumer {
    async fn fetch(&self, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut out = Vec::new();

        while out.len() < max {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, self.consumer.recv()).await {
                // Deadline hit: return whatever we have.
                Err(_) => break,
                Ok(Err(e)) => return Err(QueueError::ConsumeFailed(e.to_string())),
                Ok(Ok(message)) => {
                    out.push(Delivery {
                        partition: message.partition(),
                        offset: message.offset(),
                        key: message
                            .key()
                            .map(|k| String::from_utf8_lossy(k).into_owned())
                            .unwrap_or_default(),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    });
                }
            }
        }

        if !out.is_empty() {
            debug!("fetched {} records", out.len());
        }
        Ok(out)
    }

    async fn commit(&self, batch: &[Delivery]) -> QueueResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut highest: HashMap<i32, i64> = HashMap::new();
        for delivery in batch {
            let entry = highest.entry(delivery.partition).or_insert(delivery.offset);
            if delivery.offset > *entry {
                *entry = delivery.offset;
            }
        }

        let mut positions = TopicPartitionList::new();
        for (partition, offset) in highest {
            positions
                .add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| QueueError::CommitFailed(e.to_string()))?;
        }

        self.consumer
            .commit(&positions, CommitMode::Sync)
            .map_err(|e| QueueError::CommitFailed(e.to_string()))
    }
}
