//! Per-account activity ledger (inbound/outbound counters for ops views).

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One ledger entry. `at` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub channel: String,
    pub account_id: String,
    pub direction: Direction,
    pub at: i64,
}

/// Host-provided activity recorder; mutations must be idempotent.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn record(&self, entry: ActivityEntry) -> Result<()>;
}
