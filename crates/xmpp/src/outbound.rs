//! Outbound message sender.
//!
//! Targets normalize to bare JIDs; the message type is `groupchat` exactly
//! when the target is a room JID. A live client is preferred; without one a
//! transient client connects, sends, and stops.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::time::timeout,
    tracing::{debug, warn},
};

use {
    chatterd_channels::{
        activity::{ActivityEntry, Direction},
        plugin::ChannelOutbound,
    },
    chatterd_common::ReplyPayload,
};

use crate::{
    CHANNEL_ID,
    accounts::ResolvedAccount,
    client::{XmppClientConfig, XmppEvent, spawn_client},
    config::MarkdownMode,
    error::Error,
    jid::normalize_jid,
    markdown,
    plugin::XmppRuntime,
    stanza::{ChatState, MessageType},
    state::AccountStateMap,
};

/// Outbound sender for XMPP. Cheap to construct from the shared state map.
pub struct XmppOutbound {
    pub(crate) accounts: AccountStateMap,
    pub(crate) runtime: Arc<XmppRuntime>,
}

impl XmppOutbound {
    fn account_view(&self, account_id: &str) -> crate::error::Result<(crate::client::XmppClientHandle, ResolvedAccount)> {
        let accounts = self.accounts.read().unwrap();
        accounts
            .get(account_id)
            .map(|s| (s.client.clone(), s.account.clone()))
            .ok_or_else(|| Error::Config(format!("unknown account: {account_id}")))
    }

    /// Format and send one text body. Returns the stanza id.
    pub(crate) async fn deliver_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> crate::error::Result<String> {
        let target =
            normalize_jid(to).ok_or_else(|| Error::InvalidTarget(to.to_string()))?;
        let (client, account) = self.account_view(account_id)?;

        let mut body = match account.config.markdown {
            MarkdownMode::Plain => markdown::flatten_tables(text),
            MarkdownMode::Raw => text.to_string(),
        };
        if let Some(id) = reply_to {
            // Textual reply marker; XEP-0461 is decode-only.
            body.push_str(&format!("\n\n[reply:{id}]"));
        }

        let type_ = if (self.runtime.is_room_jid)(&target) {
            MessageType::Groupchat
        } else {
            MessageType::Chat
        };

        let id = if client.is_ready() {
            client.send_message(&target, &body, type_).await?
        } else {
            debug!(account_id, %target, "no live client, sending via transient connection");
            transient_send(&account, &target, &body, type_).await?
        };

        let entry = ActivityEntry {
            channel: CHANNEL_ID.into(),
            account_id: account_id.into(),
            direction: Direction::Outbound,
            at: crate::now_ms(),
        };
        if let Err(e) = self.runtime.activity.record(entry).await {
            warn!(account_id, "failed to record outbound activity: {e}");
        }
        Ok(id)
    }
}

/// One-shot connect, send, stop. Used when the account has no live client.
async fn transient_send(
    account: &ResolvedAccount,
    to: &str,
    body: &str,
    type_: MessageType,
) -> crate::error::Result<String> {
    let mut config = XmppClientConfig::from_account(account)?;
    config.auto_join_rooms.clear();

    let (handle, mut events, cancel) = spawn_client(config);
    let wait = Duration::from_millis(account.config.connect_timeout_ms);
    loop {
        let event = timeout(wait, events.recv())
            .await
            .map_err(|_| Error::transport("transient client connect timed out"))?
            .ok_or_else(|| Error::transport("transient client stopped"))?;
        match event {
            XmppEvent::Online { .. } => break,
            XmppEvent::Error(e) => return Err(Error::transport(e)),
            XmppEvent::Offline => {
                return Err(Error::transport("transient client went offline"));
            },
            _ => {},
        }
    }
    let id = handle.send_message(to, body, type_).await?;
    cancel.cancel();
    Ok(id)
}

#[async_trait]
impl ChannelOutbound for XmppOutbound {
    async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        self.deliver_text(account_id, to, text, reply_to).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
        reply_to: Option<&str>,
    ) -> Result<()> {
        // Plain bodies only on XMPP: media goes out as a link line.
        let body = match &payload.media {
            Some(media) if payload.text.is_empty() => media.url.clone(),
            Some(media) => format!("{}\n{}", payload.text, media.url),
            None => payload.text.clone(),
        };
        self.deliver_text(account_id, to, &body, reply_to).await?;
        Ok(())
    }

    async fn send_typing(&self, account_id: &str, to: &str) -> Result<()> {
        let target =
            normalize_jid(to).ok_or_else(|| Error::InvalidTarget(to.to_string()))?;
        let (client, _) = self.account_view(account_id)?;
        if client.is_ready() {
            client.send_chat_state(&target, ChatState::Composing).await?;
        }
        Ok(())
    }
}
