pub mod broker;
pub mod exporter;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod message;
pub mod pods;
pub mod targets;

pub use broker::Broker;
pub use exporter::PushExporter;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{DeliveredRecord, MemoryBroker};
pub use message::ExportMessage;
pub use pods::{KubePodCounter, PodCounter};
pub use targets::{kafka::KafkaBroker, kafka_rest::KafkaRestBroker};
