//! XMPP channel adapter for chatterd.
//!
//! Bridges XMPP/Jabber accounts (DMs and XEP-0045 multi-user chat) to the
//! agent gateway: connects and authenticates accounts, joins rooms, gates
//! inbound traffic through DM/group policies and mention rules, pairs
//! unknown senders, and streams agent replies back out as stanzas.

pub mod access;
pub mod accounts;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jid;
pub mod markdown;
pub mod monitor;
pub mod outbound;
pub mod pairing;
pub mod plugin;
pub mod presence;
pub mod stanza;
pub mod state;

pub use {
    config::XmppAccountConfig,
    error::{Error, Result},
    plugin::{XmppPlugin, XmppRuntime},
};

/// Channel identifier used in routing, pairing, and activity records.
pub const CHANNEL_ID: &str = "xmpp";

/// Current time as epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
