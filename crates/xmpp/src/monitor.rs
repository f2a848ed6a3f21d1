//! Account supervisor: binds one resolved account to one client and turns
//! client events into pipeline input.
//!
//! Events are consumed on a single task, so each account processes its
//! stanzas strictly in receive order; dispatches for different accounts run
//! in parallel on their own supervisors.

use std::sync::{Arc, Mutex};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info},
};

use crate::{
    client::{XmppClientConfig, XmppEvent, spawn_client},
    error::Error,
    handlers::{self, InboundMessage},
    jid::{Jid, split_occupant},
    now_ms,
    plugin::XmppRuntime,
    presence::PresenceTracker,
    stanza::{MessageStanza, MessageType},
    state::{AccountState, AccountStateMap, compile_mention_patterns},
};

/// Start the supervisor for one account. The account lands in the shared
/// state map before any event is served; the returned token stops it.
pub async fn start_account(
    account: crate::accounts::ResolvedAccount,
    accounts: AccountStateMap,
    runtime: Arc<XmppRuntime>,
) -> anyhow::Result<CancellationToken> {
    if !account.configured {
        return Err(Error::Config(format!(
            "account {} is not configured (missing JID or password)",
            account.account_id
        ))
        .into());
    }
    account
        .config
        .validate(&format!("channels.xmpp.accounts.{}", account.account_id))?;

    let client_config = XmppClientConfig::from_account(&account)?;
    let (client, mut events, cancel) = spawn_client(client_config);

    let account_id = account.account_id.clone();
    let presence = Arc::new(Mutex::new(PresenceTracker::new()));
    let state = AccountState {
        account_id: account_id.clone(),
        mention_regexes: Arc::new(compile_mention_patterns(&account.config.mention_patterns)),
        account,
        client,
        cancel: cancel.clone(),
        presence: Arc::clone(&presence),
    };
    {
        let mut map = accounts.write().unwrap();
        map.insert(account_id.clone(), state);
    }

    tokio::spawn(async move {
        info!(account_id, "xmpp supervisor started");
        while let Some(event) = events.recv().await {
            match event {
                XmppEvent::Online { jid } => {
                    info!(account_id, %jid, "account online");
                },
                XmppEvent::Offline => {
                    info!(account_id, "account offline");
                },
                XmppEvent::Error(e) => {
                    // Restarting is the gateway's decision, not ours.
                    error!(account_id, "client error: {e}");
                },
                XmppEvent::Message(stanza) => {
                    match to_inbound(&stanza) {
                        Some(inbound) => {
                            handlers::handle_inbound(&account_id, inbound, &accounts, &runtime)
                                .await;
                        },
                        None => {
                            debug!(account_id, "ignoring untranslatable message stanza");
                        },
                    }
                },
                XmppEvent::Presence(pres) => {
                    presence.lock().unwrap().observe(&pres, now_ms());
                },
            }
        }
        debug!(account_id, "xmpp supervisor ended");
    });

    Ok(cancel)
}

/// Translate a decoded message stanza into pipeline input.
///
/// Groupchat messages resolve to their room with the occupant nickname;
/// everything else resolves to the sender's bare JID. Messages without a
/// sender or a usable body are dropped upstream.
pub fn to_inbound(stanza: &MessageStanza) -> Option<InboundMessage> {
    let from = stanza.from.as_deref()?;
    let text = stanza.body.clone()?;
    let timestamp = stanza.delay_stamp.unwrap_or_else(now_ms);
    let message_id = stanza
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if stanza.type_ == MessageType::Groupchat {
        let (room, nickname) = split_occupant(from)?;
        return Some(InboundMessage {
            message_id,
            raw_target: Some(from.to_string()),
            sender_jid: format!("{room}/{nickname}"),
            sender_bare_jid: room.clone(),
            sender_resource: None,
            sender_nickname: Some(nickname),
            text,
            timestamp,
            is_group: true,
            stanza_id: stanza.id.clone(),
            replace_id: stanza.replace_id.clone(),
            reply_to: stanza.reply_to.clone(),
            receipt_request: stanza.receipt_request,
            subject: stanza.subject.clone(),
            target: room,
        });
    }

    let jid = Jid::parse(from)?;
    if jid.resource.is_none() {
        debug!(%from, "message from bare jid");
    }
    Some(InboundMessage {
        message_id,
        target: jid.bare(),
        raw_target: (from != jid.bare()).then(|| from.to_string()),
        sender_jid: jid.full(),
        sender_bare_jid: jid.bare(),
        sender_resource: jid.resource.clone(),
        sender_nickname: None,
        text,
        timestamp,
        is_group: false,
        stanza_id: stanza.id.clone(),
        replace_id: stanza.replace_id.clone(),
        reply_to: stanza.reply_to.clone(),
        receipt_request: stanza.receipt_request,
        subject: stanza.subject.clone(),
    })
}
