use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use homecall_common::error::{HomecallError, Result};

use crate::broker::Broker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Keeps every delivery attempt in memory. Attempts listed in `fail_on`
/// (zero-based) are recorded and then rejected.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    attempts: Mutex<Vec<DeliveredRecord>>,
    fail_on: Vec<usize>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            fail_on: attempts.into_iter().collect(),
        }
    }

    pub fn attempts(&self) -> Vec<DeliveredRecord> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn deliver(&self, key: &str, payload: &[u8]) -> Result<()> {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = attempts.len();
        attempts.push(DeliveredRecord {
            key: key.to_string(),
            payload: payload.to_vec(),
        });

        if self.fail_on.contains(&attempt) {
            return Err(HomecallError::Delivery(format!(
                "memory broker rejected attempt {attempt}"
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
