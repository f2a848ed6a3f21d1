use std::collections::HashMap;

use {
    chatterd_channels::gating::{DmPolicy, GroupPolicy},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

/// Default client resource (also the MUC nickname).
pub const DEFAULT_RESOURCE: &str = "chatterd";

/// Default client-to-server port.
pub const DEFAULT_PORT: u16 = 5222;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

/// How outbound markdown is rendered into plain XMPP bodies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkdownMode {
    /// Flatten tables to aligned plain text.
    #[default]
    Plain,
    /// Pass bodies through untouched.
    Raw,
}

/// Per-room overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoomConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_mention: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_from: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_by_sender: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Configuration for a single XMPP account.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XmppAccountConfig {
    /// Bare JID the account authenticates as.
    pub jid: String,

    /// Inline password. `password_file` and the `XMPP_PASSWORD` environment
    /// variable (default account only) take precedence.
    #[serde(serialize_with = "serialize_secret")]
    pub password: Secret<String>,

    /// Path to a file holding the password (trailing whitespace trimmed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,

    /// Client resource; also used as the MUC nickname.
    pub resource: String,

    /// Server host. Defaults to the JID domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    pub port: u16,

    /// Upgrade the connection with STARTTLS.
    pub tls: bool,

    pub enabled: bool,

    pub dm_policy: DmPolicy,

    /// DM allowlist: bare JIDs or `"*"`.
    pub allow_from: Vec<String>,

    pub group_policy: GroupPolicy,

    /// Group sender allowlist, unless a room overrides it.
    pub group_allow_from: Vec<String>,

    /// Room configuration keyed by room JID, or `"*"` as a wildcard.
    pub rooms: HashMap<String, RoomConfig>,

    /// Rooms joined automatically once online.
    pub auto_join_rooms: Vec<String>,

    /// Extra regex patterns that count as mentioning the bot.
    pub mention_patterns: Vec<String>,

    pub markdown: MarkdownMode,

    /// Cap on MUC history requested at join (`maxstanzas`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<u32>,

    /// Prefix prepended to the first reply chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_prefix: Option<String>,

    /// Deliver replies as completed blocks instead of a token stream.
    pub block_streaming: bool,

    pub connect_timeout_ms: u64,

    /// Default model ID for this account's sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for XmppAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmppAccountConfig")
            .field("jid", &self.jid)
            .field("password", &"[REDACTED]")
            .field("resource", &self.resource)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("dm_policy", &self.dm_policy)
            .field("group_policy", &self.group_policy)
            .finish_non_exhaustive()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl Default for XmppAccountConfig {
    fn default() -> Self {
        Self {
            jid: String::new(),
            password: Secret::new(String::new()),
            password_file: None,
            resource: DEFAULT_RESOURCE.into(),
            host: None,
            port: DEFAULT_PORT,
            tls: true,
            enabled: true,
            dm_policy: DmPolicy::default(),
            allow_from: Vec::new(),
            group_policy: GroupPolicy::default(),
            group_allow_from: Vec::new(),
            rooms: HashMap::new(),
            auto_join_rooms: Vec::new(),
            mention_patterns: Vec::new(),
            markdown: MarkdownMode::default(),
            history_limit: None,
            response_prefix: None,
            block_streaming: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            model: None,
        }
    }
}

impl XmppAccountConfig {
    /// Validate policy coherence. `path` qualifies error messages with the
    /// config location (e.g. `channels.xmpp.accounts.default`).
    pub fn validate(&self, path: &str) -> Result<()> {
        if self.dm_policy == DmPolicy::Open && !self.allow_from.iter().any(|e| e == "*") {
            return Err(Error::Config(format!(
                "{path}.allow_from must contain \"*\" when {path}.dm_policy is \"open\""
            )));
        }
        Ok(())
    }
}
