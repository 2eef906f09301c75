pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{BrokerAddress, Config, PushTarget};
pub use error::{HomecallError, Result};
pub use types::{Metric, MetricKind, Tag, TagSet};
