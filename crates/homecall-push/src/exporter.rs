use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use homecall_common::{
    BrokerAddress, Config, PushTarget, TagSet,
    error::{HomecallError, Result},
    time,
};
use homecall_metrics::Collector;
use tokio::{
    sync::{OnceCell, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    broker::Broker,
    message::{ExportMessage, ROUTING_KEY},
    pods::PodCounter,
    targets::{kafka::KafkaBroker, kafka_rest::KafkaRestBroker},
};

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Periodic publisher of `pod_status` messages.
///
/// Delivery is best effort and at most once per interval: a failed publish
/// is logged and dropped, and the loop waits for the next tick. Shutdown is
/// terminal for an exporter.
pub struct PushExporter {
    config: Config,
    collector: Collector,
    broker: Option<Arc<dyn Broker>>,
    pod_counter: Option<Arc<dyn PodCounter>>,
    running: OnceCell<RunningLoop>,
}

impl PushExporter {
    pub fn new(config: Config, collector: Collector) -> Self {
        Self {
            config,
            collector,
            broker: None,
            pod_counter: None,
            running: OnceCell::new(),
        }
    }

    /// Replaces the producer built from the configured broker address.
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_pod_counter(mut self, pod_counter: Arc<dyn PodCounter>) -> Self {
        self.pod_counter = Some(pod_counter);
        self
    }

    /// Spawns the publish loop once. Fails without spawning anything when
    /// the broker address or topic is missing, and after `shutdown`.
    pub async fn ensure_started(&self) -> Result<()> {
        let running = self
            .running
            .get_or_try_init(|| async { self.spawn_loop() })
            .await?;
        if *running.shutdown.borrow() {
            return Err(HomecallError::Stopped("push metrics loop"));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.get().is_some_and(|running| {
            running
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|task| !task.is_finished())
        })
    }

    /// Signals the loop to stop and waits for it; a publish in progress is
    /// allowed to finish.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.get() else {
            return;
        };

        running.shutdown.send_replace(true);
        let task = running
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "metrics publish loop failed");
            }
        }
    }

    fn spawn_loop(&self) -> Result<RunningLoop> {
        let target = self.config.push_target().inspect_err(|err| {
            warn!(error = %err, "push metrics sink not started");
        })?;
        let period = self.config.publish_interval;
        if period.is_zero() {
            return Err(HomecallError::Config(
                "publish interval must be greater than zero".to_string(),
            ));
        }
        let broker = match &self.broker {
            Some(broker) => Arc::clone(broker),
            None => default_broker(&target)?,
        };

        let publisher = Publisher {
            collector: self.collector.clone(),
            tags: self.config.tags(),
            namespace: self.config.namespace.clone(),
            broker: Arc::clone(&broker),
            pod_counter: self.pod_counter.clone(),
            last_timestamp: 0,
        };
        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(publisher.run(period, stop));
        info!(
            broker = %broker.describe(),
            topic = %target.topic,
            interval_secs = period.as_secs(),
            "push metrics loop started"
        );

        Ok(RunningLoop {
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Native Kafka for a `host:port` list; the REST proxy only for an explicit
/// `http(s)://` address.
pub(crate) fn default_broker(target: &PushTarget) -> Result<Arc<dyn Broker>> {
    let broker: Arc<dyn Broker> = match &target.broker {
        BrokerAddress::Kafka(bootstrap) => {
            Arc::new(KafkaBroker::new(bootstrap.clone(), target.topic.as_str()))
        }
        BrokerAddress::RestProxy(proxy) => Arc::new(KafkaRestBroker::new(proxy, &target.topic)?),
    };
    Ok(broker)
}

struct Publisher {
    collector: Collector,
    tags: TagSet,
    namespace: String,
    broker: Arc<dyn Broker>,
    pod_counter: Option<Arc<dyn PodCounter>>,
    last_timestamp: i64,
}

impl Publisher {
    async fn run(mut self, period: Duration, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.publish_once().await {
                        warn!(error = %err, "failed to publish metrics, dropping this interval");
                    }
                }
                _ = stop.changed() => {
                    info!("push metrics loop shutting down");
                    break;
                }
            }
        }
    }

    async fn publish_once(&mut self) -> Result<()> {
        let metrics = self.collector.sample();
        let pod_counts = self.pod_counts().await;
        let timestamp = self.next_timestamp();

        let message = ExportMessage::new(self.tags.clone(), &metrics, pod_counts, timestamp);
        let payload = serde_json::to_vec(&message)?;

        self.broker.deliver(ROUTING_KEY, &payload).await?;
        debug!(timestamp, bytes = payload.len(), "metrics published");
        Ok(())
    }

    async fn pod_counts(&self) -> Option<BTreeMap<String, u64>> {
        let counter = self.pod_counter.as_ref()?;
        match counter.pod_counts(&self.namespace).await {
            Ok(counts) => Some(counts),
            Err(err) => {
                warn!(error = %err, namespace = %self.namespace, "could not get pod counts");
                None
            }
        }
    }

    /// Wall-clock milliseconds, bumped when needed so consecutive messages
    /// never share or reverse a timestamp.
    fn next_timestamp(&mut self) -> i64 {
        let now = time::epoch_millis(&time::now());
        let timestamp = now.max(self.last_timestamp.saturating_add(1));
        self.last_timestamp = timestamp;
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use homecall_common::{Config, HomecallError, error::Result};
    use homecall_metrics::{Collector, MetricState};
    use serde_json::Value;

    use super::{PushExporter, default_broker};
    use crate::{Broker, memory::MemoryBroker, pods::PodCounter};

    const PERIOD: Duration = Duration::from_secs(10);

    fn config() -> Config {
        Config {
            broker: Some("kafka-service:9092".to_string()),
            topic: Some("homecalling-metrics".to_string()),
            publish_interval: PERIOD,
            controller_name: "web-operator".to_string(),
            ..Config::default()
        }
    }

    fn exporter(config: Config, broker: &Arc<MemoryBroker>) -> (Arc<MetricState>, PushExporter) {
        let state = Arc::new(MetricState::new(&config.namespace, &config.cluster));
        let exporter = PushExporter::new(config, Collector::new(Arc::clone(&state)))
            .with_broker(Arc::clone(broker) as Arc<dyn Broker>);
        (state, exporter)
    }

    fn payloads(broker: &MemoryBroker) -> Vec<Value> {
        broker
            .attempts()
            .iter()
            .map(|record| serde_json::from_slice(&record.payload).unwrap())
            .collect()
    }

    struct FixedPods(Option<BTreeMap<String, u64>>);

    #[async_trait]
    impl PodCounter for FixedPods {
        async fn pod_counts(&self, namespace: &str) -> Result<BTreeMap<String, u64>> {
            assert_eq!(namespace, "default");
            self.0
                .clone()
                .ok_or_else(|| HomecallError::Collaborator("api server unreachable".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_broker_fails_without_spawning() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(
            Config {
                broker: None,
                ..config()
            },
            &broker,
        );

        let err = exporter.ensure_started().await.unwrap_err();
        assert!(matches!(err, HomecallError::Config(_)));
        assert!(!exporter.is_running());

        tokio::time::sleep(PERIOD * 3).await;
        assert!(broker.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_topic_fails_without_spawning() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(
            Config {
                topic: Some(" ".to_string()),
                ..config()
            },
            &broker,
        );

        assert!(matches!(
            exporter.ensure_started().await,
            Err(HomecallError::Config(_))
        ));
        tokio::time::sleep(PERIOD * 3).await;
        assert!(broker.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_once_per_interval() {
        let broker = Arc::new(MemoryBroker::new());
        let (state, exporter) = exporter(config(), &broker);
        state.increment_reconcile_count();

        exporter.ensure_started().await.unwrap();
        assert!(exporter.is_running());

        tokio::time::sleep(PERIOD / 2).await;
        assert!(broker.attempts().is_empty(), "first publish waits one interval");

        tokio::time::sleep(PERIOD * 2).await;
        let attempts = broker.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|record| record.key == "metrics"));

        let messages = payloads(&broker);
        let first_ts = messages[0]["timestamp"].as_i64().unwrap();
        let second_ts = messages[1]["timestamp"].as_i64().unwrap();
        assert!(second_ts > first_ts);
        assert_eq!(messages[0]["tags"], messages[1]["tags"]);
        assert_eq!(messages[0]["name"], "pod_status");
        assert_eq!(messages[0]["tags"]["controller"], "web-operator");
        assert_eq!(messages[0]["fields"]["reconcile_count"], 1);
        assert_eq!(messages[0]["fields"]["health"], 1);
        assert!(messages[0]["fields"].get("Pods-Count").is_none());

        exporter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_does_not_stop_next_tick() {
        let broker = Arc::new(MemoryBroker::failing_on([0]));
        let (_, exporter) = exporter(config(), &broker);
        exporter.ensure_started().await.unwrap();

        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        assert_eq!(broker.attempts().len(), 1);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(broker.attempts().len(), 2);
        assert!(exporter.is_running());

        exporter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_runs_a_single_loop() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(config(), &broker);

        exporter.ensure_started().await.unwrap();
        exporter.ensure_started().await.unwrap();

        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        assert_eq!(broker.attempts().len(), 1);

        exporter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_publishing() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(config(), &broker);
        exporter.ensure_started().await.unwrap();

        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        exporter.shutdown().await;
        assert!(!exporter.is_running());

        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(broker.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_shutdown_is_refused() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(config(), &broker);
        exporter.ensure_started().await.unwrap();
        exporter.shutdown().await;

        let err = exporter.ensure_started().await.unwrap_err();
        assert!(matches!(err, HomecallError::Stopped(_)));
        assert!(!exporter.is_running());

        tokio::time::sleep(PERIOD * 3).await;
        assert!(broker.attempts().is_empty());
    }

    #[test]
    fn bare_broker_address_uses_native_kafka() {
        let target = config().push_target().unwrap();
        assert_eq!(
            default_broker(&target).unwrap().describe(),
            "kafka://kafka-service:9092/homecalling-metrics"
        );

        let target = Config {
            broker: Some("http://kafka-rest:8082".to_string()),
            ..config()
        }
        .push_target()
        .unwrap();
        assert_eq!(
            default_broker(&target).unwrap().describe(),
            "http://kafka-rest:8082/topics/homecalling-metrics"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pod_counts_are_attached_when_available() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(config(), &broker);
        let exporter = exporter.with_pod_counter(Arc::new(FixedPods(Some(BTreeMap::from([
            ("ReplicaSet".to_string(), 2),
            ("Unknown".to_string(), 1),
        ])))));
        exporter.ensure_started().await.unwrap();

        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        let messages = payloads(&broker);
        assert_eq!(messages[0]["fields"]["Pods-Count"]["ReplicaSet"], 2);
        assert_eq!(messages[0]["fields"]["Pods-Count"]["Unknown"], 1);

        exporter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pod_count_failure_omits_field_and_still_publishes() {
        let broker = Arc::new(MemoryBroker::new());
        let (_, exporter) = exporter(config(), &broker);
        let exporter = exporter.with_pod_counter(Arc::new(FixedPods(None)));
        exporter.ensure_started().await.unwrap();

        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        let messages = payloads(&broker);
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["fields"].get("Pods-Count").is_none());
        assert!(messages[0]["fields"].get("reconcile_count").is_some());

        exporter.shutdown().await;
    }
}
