use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use homecall_common::{
    error::{HomecallError, Result},
    time,
};
use rskafka::{
    client::{
        ClientBuilder,
        partition::{Compression, PartitionClient, UnknownTopicHandling},
    },
    record::Record,
};
use tokio::sync::OnceCell;

use crate::broker::Broker;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const PARTITION: i32 = 0;

/// Native Kafka producer. Every record goes to partition 0 of the topic so
/// consumers see messages in publish order.
///
/// The connection is made on first delivery and kept; a failed connect is
/// retried on the next delivery, never within one.
pub struct KafkaBroker {
    bootstrap: Vec<String>,
    topic: String,
    timeout: Duration,
    partition: OnceCell<PartitionClient>,
}

impl KafkaBroker {
    pub fn new(bootstrap: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            bootstrap,
            topic: topic.into(),
            timeout: DEFAULT_TIMEOUT,
            partition: OnceCell::new(),
        }
    }

    /// Upper bound on one delivery, connection included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<PartitionClient> {
        let client = ClientBuilder::new(self.bootstrap.clone())
            .build()
            .await
            .map_err(|err| {
                HomecallError::Delivery(format!(
                    "failed to connect to kafka {}: {err}",
                    self.bootstrap.join(",")
                ))
            })?;

        client
            .partition_client(self.topic.clone(), PARTITION, UnknownTopicHandling::Error)
            .await
            .map_err(|err| {
                HomecallError::Delivery(format!("kafka topic {} unavailable: {err}", self.topic))
            })
    }

    async fn send(&self, key: &str, payload: &[u8]) -> Result<()> {
        let partition = self.partition.get_or_try_init(|| self.connect()).await?;
        let record = Record {
            key: Some(key.as_bytes().to_vec()),
            value: Some(payload.to_vec()),
            headers: BTreeMap::new(),
            timestamp: time::now(),
        };

        partition
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(|err| {
                HomecallError::Delivery(format!(
                    "failed to produce to kafka topic {}: {err}",
                    self.topic
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn deliver(&self, key: &str, payload: &[u8]) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.send(key, payload)).await {
            Ok(result) => result,
            Err(_) => Err(HomecallError::Delivery(format!(
                "kafka {} did not acknowledge within {:?}",
                self.bootstrap.join(","),
                self.timeout
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("kafka://{}/{}", self.bootstrap.join(","), self.topic)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use homecall_common::HomecallError;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::KafkaBroker;
    use crate::broker::Broker;

    #[test]
    fn describes_bootstrap_and_topic() {
        let broker = KafkaBroker::new(
            vec!["kafka-0:9092".to_string(), "kafka-1:9092".to_string()],
            "homecalling-metrics",
        );
        assert_eq!(
            broker.describe(),
            "kafka://kafka-0:9092,kafka-1:9092/homecalling-metrics"
        );
    }

    #[tokio::test]
    async fn unreachable_broker_fails_within_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let broker = KafkaBroker::new(vec![addr], "metrics").with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let err = broker.deliver("metrics", b"{}").await.unwrap_err();

        assert!(matches!(err, HomecallError::Delivery(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn speaks_kafka_protocol_not_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let first_bytes = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 4];
            socket.read_exact(&mut prefix).await.unwrap();
            prefix
        });

        let broker = KafkaBroker::new(vec![addr], "metrics").with_timeout(Duration::from_millis(500));
        let err = broker.deliver("metrics", b"{}").await.unwrap_err();
        assert!(matches!(err, HomecallError::Delivery(_)));

        // Kafka frames start with a big-endian length, never with an HTTP verb.
        let prefix = first_bytes.await.unwrap();
        assert_ne!(&prefix, b"POST");
        assert!(u32::from_be_bytes(prefix) > 0);
    }
}
