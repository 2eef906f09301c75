use std::collections::BTreeMap;

use homecall_common::{Metric, TagSet};
use serde::Serialize;
use serde_json::Number;

pub const MESSAGE_NAME: &str = "pod_status";
pub const ROUTING_KEY: &str = "metrics";

/// Wire unit shipped to the broker on every publish tick.
#[derive(Debug, Clone, Serialize)]
pub struct ExportMessage {
    pub name: &'static str,
    pub timestamp: i64,
    pub tags: TagSet,
    pub fields: Fields,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Fields {
    #[serde(flatten)]
    pub metrics: BTreeMap<&'static str, Number>,
    #[serde(rename = "Pods-Count", skip_serializing_if = "Option::is_none")]
    pub pod_counts: Option<BTreeMap<String, u64>>,
}

impl ExportMessage {
    pub fn new(
        tags: TagSet,
        metrics: &[Metric],
        pod_counts: Option<BTreeMap<String, u64>>,
        timestamp_millis: i64,
    ) -> Self {
        let metrics = metrics
            .iter()
            .map(|metric| (metric.name, field_number(metric.value)))
            .collect();

        Self {
            name: MESSAGE_NAME,
            timestamp: timestamp_millis,
            tags,
            fields: Fields {
                metrics,
                pod_counts,
            },
        }
    }
}

/// Integral values go out as JSON integers, everything else as floats.
fn field_number(value: f64) -> Number {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        Number::from(value as i64)
    } else {
        Number::from_f64(value).unwrap_or_else(|| Number::from(0))
    }
}
