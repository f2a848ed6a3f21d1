//! Session continuity: channel adapters stamp inbound traffic so the agent
//! envelope can reference the previous exchange.

use async_trait::async_trait;

use crate::Result;

/// Host-provided session store, shared across accounts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Epoch-ms timestamp of the last recorded activity for a session, if any.
    async fn last_activity(&self, session_key: &str) -> Result<Option<i64>>;

    /// Record an inbound message under `session_key` at epoch-ms `at`.
    async fn record_inbound(&self, session_key: &str, at: i64) -> Result<()>;
}
