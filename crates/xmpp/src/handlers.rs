//! The inbound pipeline.
//!
//! Order per message: self-message drop → effective allowlists (config ∪
//! pairing store) → policy gates → forensics log + UI event (always, even
//! for denials) → pairing challenge or agent dispatch → reply delivery.
//! The supervisor awaits this per event, so one account processes messages
//! strictly in receive order.

use std::sync::Arc;

use {
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    chatterd_channels::{
        activity::{ActivityEntry, Direction},
        commands::DetectedCommand,
        dispatch::{AgentContext, DispatchOptions},
        message_log::MessageLogEntry,
        plugin::{ChannelEvent, ChannelOutbound},
        routing::{Peer, PeerKind},
    },
    chatterd_common::ChatType,
};

use crate::{
    CHANNEL_ID,
    access::{self, PolicyDecision, PolicyRequest},
    client::XmppClientHandle,
    config::XmppAccountConfig,
    error::DispatchKind,
    jid::normalize_allow_entry,
    now_ms, pairing,
    outbound::XmppOutbound,
    plugin::XmppRuntime,
    stanza::ChatState,
    state::AccountStateMap,
};

/// A normalized inbound message, produced by the monitor from a decoded
/// stanza. Values only — nothing here is shared.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    /// Room JID for group messages, sender bare JID otherwise.
    pub target: String,
    /// Original `from` before normalization, when it differs.
    pub raw_target: Option<String>,
    pub sender_jid: String,
    pub sender_bare_jid: String,
    pub sender_resource: Option<String>,
    pub sender_nickname: Option<String>,
    pub text: String,
    /// Epoch ms; delayed-delivery stamp when present, receive time otherwise.
    pub timestamp: i64,
    pub is_group: bool,
    pub stanza_id: Option<String>,
    /// XEP-0308 correction target, decoded but not acted on.
    pub replace_id: Option<String>,
    /// XEP-0461 reply origin, decoded but not acted on.
    pub reply_to: Option<String>,
    pub receipt_request: bool,
    pub subject: Option<String>,
}

/// Run the full pipeline for one inbound message.
pub async fn handle_inbound(
    account_id: &str,
    msg: InboundMessage,
    accounts: &AccountStateMap,
    runtime: &Arc<XmppRuntime>,
) {
    let (config, account_bare, client, mention_regexes) = {
        let map = accounts.read().unwrap();
        let Some(state) = map.get(account_id) else {
            warn!(account_id, "handler: account not found in state map");
            return;
        };
        (
            state.account.config.clone(),
            state.account.jid.clone(),
            state.client.clone(),
            Arc::clone(&state.mention_regexes),
        )
    };

    // Our own reflections never enter the pipeline.
    if msg.sender_bare_jid.eq_ignore_ascii_case(&account_bare) {
        debug!(account_id, "dropping self message");
        return;
    }

    let store_entries = match runtime.pairing.read_allow_from_store(CHANNEL_ID).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(account_id, "pairing store read failed: {e}");
            Vec::new()
        },
    };
    let dm_allowlist = effective_allowlist(&config.allow_from, &store_entries);
    let group_allowlist = effective_allowlist(&config.group_allow_from, &store_entries);

    let command = runtime.commands.as_ref().and_then(|d| d.detect(&msg.text));
    let account_local = account_bare.split('@').next().unwrap_or_default();

    let decision = access::evaluate(&PolicyRequest {
        config: &config,
        account_local,
        is_group: msg.is_group,
        sender_bare: &msg.sender_bare_jid,
        sender_full: &msg.sender_jid,
        sender_nickname: msg.sender_nickname.as_deref(),
        target: &msg.target,
        body: &msg.text,
        mention_regexes: &mention_regexes,
        dm_allowlist: &dm_allowlist,
        group_allowlist: &group_allowlist,
        command: command.as_ref(),
    });
    let access_granted = matches!(decision, PolicyDecision::Allow(_));

    // Log and announce every inbound message before any denial return.
    log_inbound(account_id, &msg, access_granted, runtime).await;

    match decision {
        PolicyDecision::Deny(reason) => {
            info!(account_id, %reason, sender = %msg.sender_bare_jid, "inbound dropped");
        },
        PolicyDecision::Pair => {
            if let Err(e) =
                pairing::issue_challenge(runtime, account_id, &client, &msg.sender_bare_jid).await
            {
                warn!(account_id, "pairing challenge failed: {e}");
            }
        },
        PolicyDecision::Allow(grant) => {
            debug!(account_id, "handler: access granted");
            dispatch_allowed(account_id, &msg, grant, &config, &client, command, accounts, runtime)
                .await;
        },
    }
}

/// Merge a configured allowlist with store-approved senders, normalized.
fn effective_allowlist(configured: &[String], store: &[String]) -> Vec<String> {
    let mut entries: Vec<String> = configured
        .iter()
        .chain(store.iter())
        .map(|e| normalize_allow_entry(e))
        .collect();
    entries.sort();
    entries.dedup();
    entries
}

async fn log_inbound(
    account_id: &str,
    msg: &InboundMessage,
    access_granted: bool,
    runtime: &XmppRuntime,
) {
    let sender_name = msg
        .sender_nickname
        .clone()
        .unwrap_or_else(|| local_part(&msg.sender_bare_jid));

    if let Some(log) = &runtime.message_log {
        let entry = MessageLogEntry {
            account_id: account_id.to_string(),
            channel_type: CHANNEL_ID.to_string(),
            peer_id: msg.sender_bare_jid.clone(),
            username: Some(msg.sender_bare_jid.clone()),
            sender_name: Some(sender_name.clone()),
            chat_id: msg.target.clone(),
            chat_type: if msg.is_group {
                ChatType::Group.as_str().into()
            } else {
                ChatType::Direct.as_str().into()
            },
            body: msg.text.clone(),
            access_granted,
            created_at: msg.timestamp / 1000,
        };
        if let Err(e) = log.log(entry).await {
            warn!(account_id, "failed to log message: {e}");
        }
    }

    if let Some(sink) = &runtime.event_sink {
        sink.emit(ChannelEvent::InboundMessage {
            channel_type: CHANNEL_ID.into(),
            account_id: account_id.to_string(),
            peer_id: msg.sender_bare_jid.clone(),
            username: Some(msg.sender_bare_jid.clone()),
            sender_name: Some(sender_name),
            access_granted,
        })
        .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_allowed(
    account_id: &str,
    msg: &InboundMessage,
    grant: access::Grant,
    config: &XmppAccountConfig,
    client: &XmppClientHandle,
    command: Option<DetectedCommand>,
    accounts: &AccountStateMap,
    runtime: &Arc<XmppRuntime>,
) {
    // Courtesy receipt for direct messages that asked for one.
    if msg.receipt_request
        && !msg.is_group
        && let Some(stanza_id) = &msg.stanza_id
        && let Err(e) = client.send_receipt(&msg.sender_jid, stanza_id).await
    {
        debug!(account_id, "receipt send failed: {e}");
    }

    let entry = ActivityEntry {
        channel: CHANNEL_ID.into(),
        account_id: account_id.into(),
        direction: Direction::Inbound,
        at: msg.timestamp,
    };
    if let Err(e) = runtime.activity.record(entry).await {
        warn!(account_id, "failed to record inbound activity: {e}");
    }

    let peer = Peer {
        kind: if msg.is_group {
            PeerKind::Group
        } else {
            PeerKind::Direct
        },
        id: msg.target.clone(),
    };
    let route = match runtime.routing.resolve(CHANNEL_ID, account_id, &peer).await {
        Ok(route) => route,
        Err(e) => {
            warn!(account_id, "route resolution failed: {e}");
            return;
        },
    };

    let previous = runtime
        .sessions
        .last_activity(&route.session_key)
        .await
        .ok()
        .flatten();
    if let Err(e) = runtime
        .sessions
        .record_inbound(&route.session_key, msg.timestamp)
        .await
    {
        warn!(account_id, "failed to record session activity: {e}");
    }

    if !msg.is_group {
        let _ = client.send_chat_state(&msg.target, ChatState::Composing).await;
    }

    let sender_name = msg
        .sender_nickname
        .clone()
        .unwrap_or_else(|| local_part(&msg.sender_bare_jid));
    let ctx = AgentContext {
        body: format_envelope(CHANNEL_ID, &sender_name, now_ms(), previous, &msg.text),
        raw_body: msg.text.clone(),
        command_body: command.as_ref().map(|c| c.args.clone()),
        from: if msg.is_group {
            format!("xmpp:room:{}", msg.target)
        } else {
            format!("xmpp:{}", msg.sender_bare_jid)
        },
        to: format!("xmpp:{}", msg.target),
        session_key: route.session_key.clone(),
        account_id: account_id.to_string(),
        chat_type: if msg.is_group {
            ChatType::Group.as_str().into()
        } else {
            ChatType::Direct.as_str().into()
        },
        conversation_label: msg.target.clone(),
        sender_name,
        sender_id: msg.sender_bare_jid.clone(),
        group_subject: msg.subject.clone().filter(|_| msg.is_group),
        group_system_prompt: grant.room.as_ref().and_then(|r| r.system_prompt.clone()),
        provider: CHANNEL_ID.into(),
        was_mentioned: grant.was_mentioned,
        message_sid: msg.message_id.clone(),
        timestamp: msg.timestamp,
        originating_channel: CHANNEL_ID.into(),
        originating_to: msg.target.clone(),
        command_authorized: grant.command_authorized,
    };
    // Per-sender tool restrictions beat the room-wide tool list.
    let tools = grant
        .room
        .as_ref()
        .and_then(|room| {
            room.tools_by_sender
                .as_ref()
                .and_then(|by_sender| {
                    by_sender.get(&msg.sender_bare_jid).cloned().or_else(|| {
                        msg.sender_nickname
                            .as_ref()
                            .and_then(|nick| by_sender.get(nick).cloned())
                    })
                })
                .or_else(|| room.tools.clone())
        })
        .unwrap_or_default();
    let opts = DispatchOptions {
        skills: grant
            .room
            .as_ref()
            .and_then(|r| r.skills.clone())
            .unwrap_or_default(),
        block_streaming: config.block_streaming,
        tools,
        model: config.model.clone(),
    };

    let kind = if config.block_streaming {
        DispatchKind::Block
    } else {
        DispatchKind::Stream
    };
    let outbound = XmppOutbound {
        accounts: accounts.clone(),
        runtime: Arc::clone(runtime),
    };

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    let dispatch_fut = runtime.dispatcher.dispatch(ctx, opts, reply_tx);
    let deliver_fut = async {
        let mut first = true;
        while let Some(payload) = reply_rx.recv().await {
            let mut payload = payload;
            if first && let Some(prefix) = &config.response_prefix {
                payload.text = format!("{prefix}{}", payload.text);
            }
            first = false;
            let result = if payload.media.is_some() {
                outbound
                    .send_media(account_id, &msg.target, &payload, None)
                    .await
            } else {
                outbound
                    .send_text(account_id, &msg.target, &payload.text, None)
                    .await
            };
            if let Err(e) = result {
                warn!(account_id, kind = %kind, "reply delivery failed: {e}");
            }
        }
    };

    let (dispatch_result, ()) = tokio::join!(dispatch_fut, deliver_fut);
    if let Err(e) = dispatch_result {
        warn!(account_id, kind = %kind, "agent dispatch failed: {e}");
    }

    if !msg.is_group {
        let _ = client.send_chat_state(&msg.target, ChatState::Active).await;
    }
}

fn local_part(bare_jid: &str) -> String {
    bare_jid.split('@').next().unwrap_or(bare_jid).to_string()
}

/// Agent envelope: channel and sender labels, timestamps, then the body.
fn format_envelope(
    channel: &str,
    sender: &str,
    now: i64,
    previous: Option<i64>,
    body: &str,
) -> String {
    let stamp = rfc3339(now);
    match previous.map(rfc3339) {
        Some(prev) => format!("[{channel}] {sender} at {stamp} (last session {prev}):\n{body}"),
        None => format!("[{channel}] {sender} at {stamp}:\n{body}"),
    }
}

fn rfc3339(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}
