//! Channel plugin system and host service interfaces.
//!
//! Each messaging platform implements the [`plugin::ChannelPlugin`] trait;
//! the gateway supplies the host services (pairing store, routing, sessions,
//! activity ledger, agent dispatch) that channel adapters consume.

pub mod activity;
pub mod commands;
pub mod dispatch;
pub mod error;
pub mod gating;
pub mod message_log;
pub mod pairing;
pub mod plugin;
pub mod registry;
pub mod routing;
pub mod sessions;
pub mod store;

pub use {
    error::{Error, Result},
    plugin::{
        ChannelCapabilities, ChannelEvent, ChannelEventSink, ChannelHealthSnapshot,
        ChannelOutbound, ChannelPlugin, ChannelStatus,
    },
};
