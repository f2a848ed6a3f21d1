use std::sync::Mutex;

use {anyhow::Result, async_trait::async_trait, serde::Serialize};

/// A persisted channel account configuration.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChannel {
    pub account_id: String,
    pub channel_type: String,
    pub config: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Persistent storage for channel configurations.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list(&self) -> Result<Vec<StoredChannel>>;
    async fn get(&self, channel_type: &str, account_id: &str) -> Result<Option<StoredChannel>>;
    async fn upsert(&self, channel: StoredChannel) -> Result<()>;
    async fn delete(&self, channel_type: &str, account_id: &str) -> Result<()>;
}

/// In-memory store for tests and ephemeral gateways.
#[derive(Default)]
pub struct MemoryChannelStore {
    channels: Mutex<Vec<StoredChannel>>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn list(&self) -> Result<Vec<StoredChannel>> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn get(&self, channel_type: &str, account_id: &str) -> Result<Option<StoredChannel>> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.channel_type == channel_type && c.account_id == account_id)
            .cloned())
    }

    async fn upsert(&self, channel: StoredChannel) -> Result<()> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(existing) = channels
            .iter_mut()
            .find(|c| c.channel_type == channel.channel_type && c.account_id == channel.account_id)
        {
            *existing = channel;
        } else {
            channels.push(channel);
        }
        Ok(())
    }

    async fn delete(&self, channel_type: &str, account_id: &str) -> Result<()> {
        self.channels
            .lock()
            .unwrap()
            .retain(|c| !(c.channel_type == channel_type && c.account_id == account_id));
        Ok(())
    }
}
