//! Pairing adapter: first-contact challenges and approval notifications.
//!
//! The store is the source of truth — a challenge reply is sent only when
//! the store reports the request as newly created, which makes repeated
//! DMs from the same sender no-ops.

use {
    chatterd_channels::plugin::ChannelEvent,
    tracing::{debug, info, warn},
};

use crate::{
    CHANNEL_ID,
    client::XmppClientHandle,
    error::{Error, Result},
    plugin::XmppRuntime,
    stanza::MessageType,
    state::AccountStateMap,
};

/// Fixed message sent when an operator approves a pairing request.
pub const APPROVAL_MESSAGE: &str =
    "Your pairing request was approved. You can message me now.";

/// Issue a pairing challenge for an unknown DM sender. Duplicate requests
/// are suppressed by the store; store failures skip the reply (the inbound
/// message is dropped either way).
pub async fn issue_challenge(
    runtime: &XmppRuntime,
    account_id: &str,
    client: &XmppClientHandle,
    sender_bare: &str,
) -> Result<()> {
    let id = sender_bare.to_lowercase();
    let upsert = runtime
        .pairing
        .upsert_pairing_request(CHANNEL_ID, &id)
        .await
        .map_err(|e| Error::PairingStore(e.to_string()))?;

    if !upsert.created {
        debug!(account_id, peer = %id, "pairing request already pending, no reply");
        return Ok(());
    }

    info!(account_id, peer = %id, "pairing challenge issued");
    if let Some(sink) = &runtime.event_sink {
        sink.emit(ChannelEvent::PairingChallenge {
            channel_type: CHANNEL_ID.into(),
            account_id: account_id.into(),
            peer_id: id.clone(),
            code: upsert.code.clone(),
        })
        .await;
    }

    let reply = runtime.pairing.build_pairing_reply(&id, &upsert.code);
    client
        .send_message(sender_bare, &reply, MessageType::Chat)
        .await?;
    Ok(())
}

/// Send the fixed approval message to a just-approved sender. Called by the
/// host's pairing subsystem after out-of-band operator approval.
pub async fn notify_approval(
    accounts: &AccountStateMap,
    runtime: &XmppRuntime,
    id: &str,
) -> Result<()> {
    let target = id.to_lowercase();

    let client = {
        let map = accounts.read().unwrap();
        map.values()
            .find(|s| s.client.is_ready())
            .map(|s| (s.account_id.clone(), s.client.clone()))
    };
    let Some((account_id, client)) = client else {
        return Err(Error::transport("no connected account to notify from"));
    };

    if let Err(e) = client
        .send_message(&target, APPROVAL_MESSAGE, MessageType::Chat)
        .await
    {
        warn!(account_id, peer = %target, "approval notification failed: {e}");
        return Err(e);
    }

    if let Some(sink) = &runtime.event_sink {
        sink.emit(ChannelEvent::PairingResolved {
            channel_type: CHANNEL_ID.into(),
            account_id,
            peer_id: target,
            resolution: "approved".into(),
        })
        .await;
    }
    Ok(())
}
