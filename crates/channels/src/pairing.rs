//! First-contact pairing: unknown DM senders receive a short code an
//! operator approves out-of-band. The store is shared across accounts and
//! must be idempotent per `(channel, id)`.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use {async_trait::async_trait, rand::Rng};

use crate::Result;

/// Outcome of an upsert: whether a new request was created, and the code
/// attached to the (new or pre-existing) request.
#[derive(Debug, Clone)]
pub struct PairingUpsert {
    pub created: bool,
    pub code: String,
}

/// Persistent pairing store provided by the host.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// All approved sender IDs for `channel`, merged into allowlists.
    async fn read_allow_from_store(&self, channel: &str) -> Result<Vec<String>>;

    /// Record a pairing request for `(channel, id)`. Duplicate requests are
    /// no-ops that return `created = false` with the original code.
    async fn upsert_pairing_request(&self, channel: &str, id: &str) -> Result<PairingUpsert>;

    /// One-line instruction sent to the sender on first contact.
    fn build_pairing_reply(&self, id: &str, code: &str) -> String {
        format!(
            "Hi! Access requires approval. Ask the operator to approve {id} with pairing code {code}."
        )
    }
}

/// In-memory pairing store. Backs tests and single-process deployments;
/// production hosts persist requests behind the same trait.
#[derive(Default)]
pub struct MemoryPairingStore {
    inner: Mutex<MemoryPairingInner>,
}

#[derive(Default)]
struct MemoryPairingInner {
    /// (channel, id) → issued code, for requests awaiting approval.
    pending: HashMap<(String, String), String>,
    /// (channel, id) pairs an operator has approved.
    approved: HashSet<(String, String)>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve a pending request. Returns false when nothing was pending.
    pub fn approve(&self, channel: &str, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key = (channel.to_string(), id.to_string());
        if inner.pending.remove(&key).is_some() {
            inner.approved.insert(key);
            true
        } else {
            false
        }
    }

    /// Pending request codes for a channel, for operator listings.
    pub fn pending(&self, channel: &str) -> Vec<(String, String)> {
        let inner = self.inner.lock().unwrap();
        inner
            .pending
            .iter()
            .filter(|((ch, _), _)| ch == channel)
            .map(|((_, id), code)| (id.clone(), code.clone()))
            .collect()
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn read_allow_from_store(&self, channel: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .approved
            .iter()
            .filter(|(ch, _)| ch == channel)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn upsert_pairing_request(&self, channel: &str, id: &str) -> Result<PairingUpsert> {
        let mut inner = self.inner.lock().unwrap();
        let key = (channel.to_string(), id.to_string());
        if inner.approved.contains(&key) {
            return Ok(PairingUpsert {
                created: false,
                code: String::new(),
            });
        }
        if let Some(code) = inner.pending.get(&key) {
            return Ok(PairingUpsert {
                created: false,
                code: code.clone(),
            });
        }
        let code = generate_pairing_code();
        inner.pending.insert(key, code.clone());
        Ok(PairingUpsert {
            created: true,
            code,
        })
    }
}

/// Generate a random 6-digit pairing code.
fn generate_pairing_code() -> String {
    let code: u32 = rand::rng().random_range(100_000..1_000_000);
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_upsert_creates_request() {
        let store = MemoryPairingStore::new();
        let up = store.upsert_pairing_request("xmpp", "bob@ex").await.unwrap();
        assert!(up.created);
        assert_eq!(up.code.len(), 6);
        assert!(up.code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn duplicate_upsert_is_noop_with_same_code() {
        let store = MemoryPairingStore::new();
        let first = store.upsert_pairing_request("xmpp", "bob@ex").await.unwrap();
        let second = store.upsert_pairing_request("xmpp", "bob@ex").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.code, first.code);
    }

    #[tokio::test]
    async fn approval_moves_id_to_allowlist() {
        let store = MemoryPairingStore::new();
        store.upsert_pairing_request("xmpp", "bob@ex").await.unwrap();
        assert!(store.approve("xmpp", "bob@ex"));

        let allowed = store.read_allow_from_store("xmpp").await.unwrap();
        assert_eq!(allowed, vec!["bob@ex".to_string()]);

        // Re-upsert after approval stays a no-op.
        let up = store.upsert_pairing_request("xmpp", "bob@ex").await.unwrap();
        assert!(!up.created);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let store = MemoryPairingStore::new();
        store.upsert_pairing_request("xmpp", "bob@ex").await.unwrap();
        store.approve("xmpp", "bob@ex");
        assert!(
            store
                .read_allow_from_store("telegram")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn pairing_reply_names_id_and_code() {
        let store = MemoryPairingStore::new();
        let reply = store.build_pairing_reply("bob@ex", "123456");
        assert!(reply.contains("bob@ex"));
        assert!(reply.contains("123456"));
    }
}
