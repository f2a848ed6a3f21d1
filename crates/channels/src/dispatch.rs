//! Agent dispatch: the bridge from an accepted inbound message to the agent
//! runtime. Replies stream back as chunks over an mpsc channel; the channel
//! adapter forwards each chunk to its outbound sender.

use {async_trait::async_trait, chatterd_common::ReplyPayload, serde::Serialize, tokio::sync::mpsc};

use crate::Result;

/// Sender half the dispatcher pushes reply chunks into.
pub type ReplySender = mpsc::Sender<ReplyPayload>;

/// Receiver half consumed by the channel adapter.
pub type ReplyReceiver = mpsc::Receiver<ReplyPayload>;

/// Context payload handed to the agent runtime for one inbound message.
///
/// Field names serialize in the gateway's envelope convention (PascalCase).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentContext {
    /// Formatted agent envelope (channel/sender labels, timestamps, body).
    pub body: String,
    /// Unmodified inbound body.
    pub raw_body: String,
    /// Command arguments when a control command was detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_body: Option<String>,
    pub from: String,
    pub to: String,
    pub session_key: String,
    pub account_id: String,
    pub chat_type: String,
    pub conversation_label: String,
    pub sender_name: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_system_prompt: Option<String>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_mentioned: Option<bool>,
    pub message_sid: String,
    /// Epoch-ms timestamp of the inbound message.
    pub timestamp: i64,
    pub originating_channel: String,
    pub originating_to: String,
    pub command_authorized: bool,
}

/// Per-dispatch options resolved from channel/room configuration.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Skill filter for this conversation (empty = all skills).
    pub skills: Vec<String>,
    /// Deliver replies as completed blocks instead of a token stream.
    pub block_streaming: bool,
    /// Per-sender/room tool filter, when the room config restricts tools.
    pub tools: Vec<String>,
    /// Model override for this account's sessions.
    pub model: Option<String>,
}

/// The agent runtime boundary. Implementations run the model loop and push
/// each reply chunk into `replies`; dropping the sender ends the stream.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        ctx: AgentContext,
        opts: DispatchOptions,
        replies: ReplySender,
    ) -> Result<()>;
}
