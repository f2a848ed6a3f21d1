//! Route inbound messages to agents and derive session keys.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::Result;

/// Which side of a channel a peer sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Direct,
    Group,
}

/// The conversation partner a message belongs to: a user for DMs, a room for
/// group chats.
#[derive(Debug, Clone)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
}

/// Resolved route: which agent handles this message and under which session.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub agent_id: String,
    pub session_key: String,
}

/// Resolve which agent should handle a message. The gateway walks its
/// binding cascade (peer → account → channel → default agent).
#[async_trait]
pub trait RouteResolver: Send + Sync {
    async fn resolve(&self, channel: &str, account_id: &str, peer: &Peer)
    -> Result<ResolvedRoute>;
}
