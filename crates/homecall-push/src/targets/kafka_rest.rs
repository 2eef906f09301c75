use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use homecall_common::error::{HomecallError, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::broker::Broker;

const BINARY_CONTENT_TYPE: &str = "application/vnd.kafka.binary.v2+json";
const RESPONSE_CONTENT_TYPE: &str = "application/vnd.kafka.v2+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: [ProduceRecord<'a>; 1],
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<ProduceOffset>,
}

#[derive(Debug, Deserialize)]
struct ProduceOffset {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// Producer for a Kafka REST proxy (v2 API). Records use the binary embedded
/// format, so the topic receives exactly the key and payload bytes given.
pub struct KafkaRestBroker {
    endpoint: Url,
    client: reqwest::Client,
}

impl KafkaRestBroker {
    pub fn new(proxy: &Url, topic: &str) -> Result<Self> {
        let mut endpoint = proxy.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| {
                HomecallError::Config(format!("proxy address {proxy} cannot carry a topic path"))
            })?
            .pop_if_empty()
            .push("topics")
            .push(topic);

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| HomecallError::Config(format!("failed to build broker client: {err}")))?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn send(&self, key: &str, payload: &[u8]) -> Result<()> {
        let key = STANDARD.encode(key);
        let value = STANDARD.encode(payload);
        let request = ProduceRequest {
            records: [ProduceRecord {
                key: &key,
                value: &value,
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, BINARY_CONTENT_TYPE)
            .header(ACCEPT, RESPONSE_CONTENT_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                HomecallError::Delivery(format!(
                    "failed to send metrics to {}: {err}",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HomecallError::Delivery(format!(
                "broker {} returned status {status}",
                self.endpoint
            )));
        }

        // An unparseable body still means the proxy accepted the request.
        let body: ProduceResponse = response.json().await.unwrap_or_default();
        if let Some(rejected) = body
            .offsets
            .iter()
            .find(|offset| offset.error_code.is_some() || offset.error.is_some())
        {
            return Err(HomecallError::Delivery(format!(
                "broker {} rejected record: code={:?} error={}",
                self.endpoint,
                rejected.error_code,
                rejected.error.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Broker for KafkaRestBroker {
    async fn deliver(&self, key: &str, payload: &[u8]) -> Result<()> {
        Self::send(self, key, payload).await
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}
