use crate::cluster::ClusterClient;
use crate::config::ClusterConfig;
use crate::error::{LagwatchError, Result};
use crate::gateway::StorageClient;
use crate::kafka::offsets_topic::decode_commit;
use crate::lifecycle::{ServiceHandle, shutdown_requested};
use crate::storage::engine::unix_now_ms;
use crate::storage::{HighWaterMark, OffsetCommit};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const ERROR_PAUSE: Duration = Duration::from_secs(1);

struct Running {
    reader_stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    poller: ServiceHandle,
}

/// Ingests one Kafka cluster: committed offsets from the offsets topic and
/// high-water marks from the brokers.
pub struct KafkaClusterClient {
    config: ClusterConfig,
    running: Option<Running>,
}

impl KafkaClusterClient {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &self.config.bootstrap_servers);
        client_config.set("client.id", format!("lagwatch-{}", self.config.name));

        for (key, value) in &self.config.consumer_properties {
            client_config.set(key, value);
        }
        client_config
    }

    fn create_metadata_consumer(&self) -> Result<BaseConsumer> {
        self.client_config()
            .set("group.id", format!("lagwatch-{}-metadata", self.config.name))
            .set("enable.auto.commit", "false")
            .create()
            .map_err(LagwatchError::Kafka)
    }

    /// Every replica reads the whole offsets topic, so the group is never joined.
    fn offsets_consumer_config(&self) -> ClientConfig {
        let mut client_config = self.client_config();
        client_config
            .set("group.id", format!("lagwatch-{}", self.config.name))
            .set("enable.auto.commit", "false")
            .set("exclude.internal.topics", "false");
        client_config
    }
}

/// Manual assignment of every partition of `topic`, positioned at the beginning.
fn offsets_assignment(topic: &str, partitions: &[i32]) -> Result<TopicPartitionList> {
    let mut assignment = TopicPartitionList::with_capacity(partitions.len());
    for &partition in partitions {
        assignment
            .add_partition_offset(topic, partition, Offset::Beginning)
            .map_err(LagwatchError::Kafka)?;
    }
    Ok(assignment)
}

/// Create the offsets reader and assign it the full offsets topic.
fn open_offsets_reader(
    client_config: ClientConfig,
    topic: &str,
    timeout: Duration,
) -> Result<BaseConsumer> {
    let consumer: BaseConsumer = client_config.create().map_err(LagwatchError::Kafka)?;
    let metadata = consumer
        .fetch_metadata(Some(topic), timeout)
        .map_err(LagwatchError::Kafka)?;

    let partitions: Vec<i32> = metadata
        .topics()
        .iter()
        .filter(|t| t.name() == topic)
        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
        .collect();
    if partitions.is_empty() {
        return Err(LagwatchError::Config(format!(
            "offsets topic {topic} has no partitions"
        )));
    }

    consumer
        .assign(&offsets_assignment(topic, &partitions)?)
        .map_err(LagwatchError::Kafka)?;
    debug!(topic, partitions = partitions.len(), "Offsets topic assigned");
    Ok(consumer)
}

#[async_trait::async_trait]
impl ClusterClient for KafkaClusterClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip_all, fields(cluster = %self.config.name))]
    async fn start(&mut self, storage: StorageClient) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let metadata_consumer = Arc::new(self.create_metadata_consumer()?);
        let timeout = self.config.kafka_timeout;

        // fail startup if the cluster is unreachable
        let probe = Arc::clone(&metadata_consumer);
        let brokers = tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(None, timeout)
                .map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| LagwatchError::Channel(format!("metadata probe task: {e}")))?
        .map_err(LagwatchError::Kafka)?;

        let offsets_config = self.offsets_consumer_config();
        let offsets_topic = self.config.offsets_topic.clone();
        let offsets_consumer = tokio::task::spawn_blocking(move || {
            open_offsets_reader(offsets_config, &offsets_topic, timeout)
        })
        .await
        .map_err(|e| LagwatchError::Channel(format!("offsets reader setup task: {e}")))??;
        let reader_stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = Arc::clone(&reader_stop);
            let cluster = self.config.name.clone();
            let storage = storage.clone();
            tokio::task::spawn_blocking(move || {
                consume_offsets(&offsets_consumer, &cluster, &storage, &stop);
            })
        };

        let poller = {
            let cluster = self.config.name.clone();
            let interval = self.config.broker_offsets_interval;
            ServiceHandle::spawn(format!("broker-poller-{cluster}"), move |shutdown| {
                poll_broker_offsets(metadata_consumer, cluster, storage, interval, timeout, shutdown)
            })
        };

        info!(
            brokers,
            offsets_topic = %self.config.offsets_topic,
            "Cluster client started"
        );

        self.running = Some(Running {
            reader_stop,
            reader,
            poller,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.poller.stop().await;
        running.reader_stop.store(true, Ordering::Relaxed);
        if let Err(e) = running.reader.await {
            error!(cluster = %self.config.name, error = %e, "Offsets reader ended abnormally");
        }
        info!(cluster = %self.config.name, "Cluster client stopped");
    }
}

/// Blocking loop feeding offset commits into storage until `stop` is raised.
fn consume_offsets(
    consumer: &BaseConsumer,
    cluster: &str,
    storage: &StorageClient,
    stop: &AtomicBool,
) {
    debug!(cluster, "Offsets reader started");
    while !stop.load(Ordering::Relaxed) {
        let message = match consumer.poll(POLL_TIMEOUT) {
            None => continue,
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(cluster, error = %e, "Offsets topic consume error");
                std::thread::sleep(ERROR_PAUSE);
                continue;
            }
        };

        let Some(key) = message.key() else {
            continue;
        };
        match decode_commit(key, message.payload()) {
            Ok(Some(commit)) => {
                trace!(
                    cluster,
                    group = %commit.group,
                    topic = %commit.topic,
                    partition = commit.partition,
                    offset = commit.offset,
                    "Offset commit"
                );
                storage.record_offset(OffsetCommit {
                    cluster: cluster.to_string(),
                    group: commit.group,
                    topic: commit.topic,
                    partition: commit.partition,
                    offset: commit.offset,
                    timestamp_ms: commit.commit_timestamp_ms,
                });
            }
            Ok(None) => {}
            Err(e) => debug!(
                cluster,
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Skipping undecodable offsets record"
            ),
        }
    }
    debug!(cluster, "Offsets reader stopped");
}

/// High-water mark of every partition the brokers report.
fn fetch_high_water_marks(
    consumer: &BaseConsumer,
    timeout: Duration,
) -> Result<Vec<(String, i32, i64)>> {
    let metadata = consumer
        .fetch_metadata(None, timeout)
        .map_err(LagwatchError::Kafka)?;

    let mut marks = Vec::new();
    for topic in metadata.topics() {
        for partition in topic.partitions() {
            match consumer.fetch_watermarks(topic.name(), partition.id(), timeout) {
                Ok((_low, high)) => marks.push((topic.name().to_string(), partition.id(), high)),
                Err(e) => warn!(
                    topic = topic.name(),
                    partition = partition.id(),
                    error = %e,
                    "Failed to fetch watermarks"
                ),
            }
        }
    }
    Ok(marks)
}

async fn poll_broker_offsets(
    consumer: Arc<BaseConsumer>,
    cluster: String,
    storage: StorageClient,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        let consumer = Arc::clone(&consumer);
        let result =
            tokio::task::spawn_blocking(move || fetch_high_water_marks(&consumer, timeout)).await;

        match result {
            Ok(Ok(marks)) => {
                let timestamp_ms = unix_now_ms();
                let count = marks.len();
                for (topic, partition, offset) in marks {
                    storage.record_high_water_mark(HighWaterMark {
                        cluster: cluster.clone(),
                        topic,
                        partition,
                        offset,
                        timestamp_ms,
                    });
                }
                debug!(cluster = %cluster, partitions = count, "Broker offsets refreshed");
            }
            Ok(Err(e)) => warn!(cluster = %cluster, error = %e, "Broker offset poll failed"),
            Err(e) => error!(cluster = %cluster, error = %e, "Broker offset poll task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> ClusterConfig {
        ClusterConfig {
            name: "prod".to_string(),
            bootstrap_servers: "localhost:9092".to_string(),
            offsets_topic: "__consumer_offsets".to_string(),
            broker_offsets_interval: Duration::from_secs(30),
            kafka_timeout: Duration::from_secs(10),
            consumer_properties: HashMap::from([(
                "security.protocol".to_string(),
                "PLAINTEXT".to_string(),
            )]),
        }
    }

    #[test]
    fn test_client_config_carries_cluster_settings() {
        let client = KafkaClusterClient::new(config());
        let client_config = client.client_config();

        assert_eq!(client_config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client_config.get("client.id"), Some("lagwatch-prod"));
        assert_eq!(client_config.get("security.protocol"), Some("PLAINTEXT"));
        assert_eq!(client.name(), "prod");
    }

    #[test]
    fn test_offsets_consumer_never_commits() {
        let client = KafkaClusterClient::new(config());
        let client_config = client.offsets_consumer_config();

        assert_eq!(client_config.get("group.id"), Some("lagwatch-prod"));
        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("exclude.internal.topics"), Some("false"));
        assert_eq!(client_config.get("bootstrap.servers"), Some("localhost:9092"));
    }

    #[test]
    fn test_offsets_assignment_covers_every_partition_from_beginning() {
        let partitions: Vec<i32> = (0..50).collect();
        let assignment = offsets_assignment("__consumer_offsets", &partitions).unwrap();

        assert_eq!(assignment.count(), 50);
        let elements = assignment.elements();
        let assigned: Vec<i32> = elements.iter().map(|e| e.partition()).collect();
        assert_eq!(assigned, partitions);
        assert!(elements.iter().all(|e| e.topic() == "__consumer_offsets"));
        assert!(elements.iter().all(|e| e.offset() == Offset::Beginning));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut client = KafkaClusterClient::new(config());
        client.stop().await;
        assert!(client.running.is_none());
    }
}
