//! Account resolution: merge base channel config with per-account overrides,
//! apply environment fallbacks for the default account, and pick the
//! password source.

use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::{
    config::XmppAccountConfig,
    error::{Error, Result},
    jid::Jid,
};

/// The account used when no account ID is given.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// The `channels.xmpp` section: base account fields plus named accounts.
/// Per-account fields win over the base on merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsXmppConfig {
    #[serde(flatten)]
    pub base: serde_json::Map<String, serde_json::Value>,
    pub accounts: HashMap<String, serde_json::Value>,
}

/// Where the resolved password came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    Env,
    PasswordFile,
    Config,
    None,
}

/// A fully resolved account, ready to hand to the client.
#[derive(Clone)]
pub struct ResolvedAccount {
    pub account_id: String,
    /// Bare JID; empty when unconfigured.
    pub jid: String,
    pub resource: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub password: Secret<String>,
    pub password_source: PasswordSource,
    pub enabled: bool,
    /// True when both JID and password are present.
    pub configured: bool,
    pub config: XmppAccountConfig,
}

impl std::fmt::Debug for ResolvedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAccount")
            .field("account_id", &self.account_id)
            .field("jid", &self.jid)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("password", &"[REDACTED]")
            .field("password_source", &self.password_source)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

/// Environment access seam so resolution is testable without mutating the
/// process environment.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// List configured account IDs; a config without an `accounts` table has the
/// single synthetic default account.
pub fn list_account_ids(config: &ChannelsXmppConfig) -> Vec<String> {
    if config.accounts.is_empty() {
        vec![DEFAULT_ACCOUNT_ID.to_string()]
    } else {
        let mut ids: Vec<String> = config.accounts.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Resolve one account from the channel config.
///
/// `pinned` marks an explicitly chosen account: unpinned requests for an
/// unconfigured account fall back to the default account when that one is
/// configured.
pub fn resolve_account(
    config: &ChannelsXmppConfig,
    account_id: Option<&str>,
    pinned: bool,
    env: &dyn EnvSource,
) -> Result<ResolvedAccount> {
    let requested = normalize_account_id(account_id);
    let resolved = resolve_one(config, &requested, env)?;

    if !resolved.configured && !pinned && requested != DEFAULT_ACCOUNT_ID {
        let fallback = resolve_one(config, DEFAULT_ACCOUNT_ID, env)?;
        if fallback.configured {
            return Ok(fallback);
        }
    }
    Ok(resolved)
}

/// Resolve an account directly from its merged typed config (plugin start
/// path, where the gateway already merged and persisted the JSON).
pub fn resolve_from_config(
    account_id: &str,
    config: XmppAccountConfig,
    env: &dyn EnvSource,
) -> ResolvedAccount {
    finish_resolution(normalize_account_id(Some(account_id)), config, env)
}

fn normalize_account_id(account_id: Option<&str>) -> String {
    let trimmed = account_id.unwrap_or("").trim();
    if trimmed.is_empty() {
        DEFAULT_ACCOUNT_ID.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

fn resolve_one(
    config: &ChannelsXmppConfig,
    account_id: &str,
    env: &dyn EnvSource,
) -> Result<ResolvedAccount> {
    let mut merged = serde_json::Map::new();
    for (key, value) in &config.base {
        if key != "accounts" {
            merged.insert(key.clone(), value.clone());
        }
    }
    if let Some(serde_json::Value::Object(overrides)) = config.accounts.get(account_id) {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }

    // Numeric/boolean env fallbacks must not shadow explicit config values,
    // so they apply at the JSON level where absence is observable.
    if account_id == DEFAULT_ACCOUNT_ID {
        if !merged.contains_key("port")
            && let Some(port) = env.var("XMPP_PORT").and_then(|p| p.trim().parse::<u16>().ok())
        {
            merged.insert("port".into(), serde_json::json!(port));
        }
        if !merged.contains_key("tls")
            && let Some(tls) = env.var("XMPP_TLS").and_then(|t| parse_bool(&t))
        {
            merged.insert("tls".into(), serde_json::json!(tls));
        }
    }

    let account: XmppAccountConfig = serde_json::from_value(serde_json::Value::Object(merged))
        .map_err(|e| Error::Config(format!("channels.xmpp.accounts.{account_id}: {e}")))?;

    Ok(finish_resolution(account_id.to_string(), account, env))
}

fn finish_resolution(
    account_id: String,
    mut account: XmppAccountConfig,
    env: &dyn EnvSource,
) -> ResolvedAccount {
    let is_default = account_id == DEFAULT_ACCOUNT_ID;

    // Environment fallbacks apply to the default account only.
    if is_default {
        if account.jid.trim().is_empty()
            && let Some(jid) = env.var("XMPP_JID")
        {
            account.jid = jid;
        }
        if account.host.is_none()
            && let Some(host) = env.var("XMPP_HOST")
        {
            account.host = Some(host);
        }
        if account.auto_join_rooms.is_empty()
            && let Some(rooms) = env.var("XMPP_ROOMS")
        {
            account.auto_join_rooms = rooms
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    let (password, password_source) = resolve_password(&account_id, &account, env);

    let bare_jid = Jid::parse(&account.jid).map(|j| j.bare()).unwrap_or_default();
    let host = account
        .host
        .clone()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| {
            Jid::parse(&account.jid)
                .map(|j| j.domain)
                .unwrap_or_default()
        });

    let configured = !bare_jid.is_empty() && !password.expose_secret().is_empty();

    ResolvedAccount {
        jid: bare_jid,
        resource: account.resource.clone(),
        host,
        port: account.port,
        tls: account.tls,
        password,
        password_source,
        enabled: account.enabled,
        configured,
        config: account,
        account_id,
    }
}

/// Precedence: env (default account only) → password file → inline config.
fn resolve_password(
    account_id: &str,
    account: &XmppAccountConfig,
    env: &dyn EnvSource,
) -> (Secret<String>, PasswordSource) {
    if account_id == DEFAULT_ACCOUNT_ID
        && let Some(password) = env.var("XMPP_PASSWORD")
        && !password.is_empty()
    {
        return (Secret::new(password), PasswordSource::Env);
    }
    if let Some(path) = &account.password_file {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let trimmed = contents.trim().to_string();
                if !trimmed.is_empty() {
                    return (Secret::new(trimmed), PasswordSource::PasswordFile);
                }
            },
            Err(e) => {
                warn!(account_id, path, "failed to read password file: {e}");
            },
        }
    }
    if !account.password.expose_secret().is_empty() {
        return (account.password.clone(), PasswordSource::Config);
    }
    (Secret::new(String::new()), PasswordSource::None)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_json(json: serde_json::Value) -> ChannelsXmppConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn synthesizes_default_account() {
        let cfg = ChannelsXmppConfig::default();
        assert_eq!(list_account_ids(&cfg), vec!["default"]);
    }

    #[test]
    fn lists_named_accounts_sorted() {
        let cfg = config_json(serde_json::json!({
            "accounts": {"work": {}, "home": {}}
        }));
        assert_eq!(list_account_ids(&cfg), vec!["home", "work"]);
    }

    #[test]
    fn base_fields_merge_under_account_overrides() {
        let cfg = config_json(serde_json::json!({
            "resource": "shared",
            "port": 5223,
            "accounts": {
                "work": {"jid": "w@example.com", "password": "p", "port": 15222}
            }
        }));
        let account = resolve_account(&cfg, Some("work"), true, &env(&[])).unwrap();
        assert_eq!(account.resource, "shared");
        assert_eq!(account.port, 15_222);
        assert_eq!(account.jid, "w@example.com");
        assert!(account.configured);
    }

    #[test]
    fn env_fallbacks_apply_to_default_only() {
        let cfg = config_json(serde_json::json!({
            "accounts": {
                "default": {},
                "work": {}
            }
        }));
        let vars = env(&[
            ("XMPP_JID", "Agent@Example.com"),
            ("XMPP_PASSWORD", "envpass"),
            ("XMPP_PORT", "5223"),
            ("XMPP_TLS", "false"),
            ("XMPP_ROOMS", "a@muc.ex, b@muc.ex"),
        ]);

        let default = resolve_account(&cfg, None, false, &vars).unwrap();
        assert_eq!(default.jid, "agent@example.com");
        assert_eq!(default.password.expose_secret(), "envpass");
        assert_eq!(default.password_source, PasswordSource::Env);
        assert_eq!(default.port, 5223);
        assert!(!default.tls);
        assert_eq!(
            default.config.auto_join_rooms,
            vec!["a@muc.ex".to_string(), "b@muc.ex".to_string()]
        );

        let work = resolve_one(&cfg, "work", &vars).unwrap();
        assert!(!work.configured);
        assert_eq!(work.password_source, PasswordSource::None);
    }

    #[test]
    fn password_file_beats_inline() {
        let path = std::env::temp_dir().join("chatterd-xmpp-pw-test");
        std::fs::write(&path, "filepass\n").unwrap();

        let cfg = config_json(serde_json::json!({
            "accounts": {
                "work": {
                    "jid": "w@ex.com",
                    "password": "inline",
                    "password_file": path.to_str().unwrap()
                }
            }
        }));
        let account = resolve_account(&cfg, Some("work"), true, &env(&[])).unwrap();
        assert_eq!(account.password.expose_secret(), "filepass");
        assert_eq!(account.password_source, PasswordSource::PasswordFile);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_password_file_falls_back_to_inline() {
        let cfg = config_json(serde_json::json!({
            "accounts": {
                "work": {
                    "jid": "w@ex.com",
                    "password": "inline",
                    "password_file": "/nonexistent/chatterd-pw"
                }
            }
        }));
        let account = resolve_account(&cfg, Some("work"), true, &env(&[])).unwrap();
        assert_eq!(account.password.expose_secret(), "inline");
        assert_eq!(account.password_source, PasswordSource::Config);
    }

    #[test]
    fn host_defaults_to_jid_domain() {
        let cfg = config_json(serde_json::json!({
            "accounts": {"work": {"jid": "w@chat.example.org", "password": "p"}}
        }));
        let account = resolve_account(&cfg, Some("work"), true, &env(&[])).unwrap();
        assert_eq!(account.host, "chat.example.org");
    }

    #[test]
    fn unpinned_unconfigured_account_falls_back_to_default() {
        let cfg = config_json(serde_json::json!({
            "jid": "agent@example.com",
            "password": "p",
            "accounts": {
                "default": {},
                "ghost": {"jid": "", "password": ""}
            }
        }));
        let account = resolve_account(&cfg, Some("ghost"), false, &env(&[])).unwrap();
        assert_eq!(account.account_id, "default");
        assert!(account.configured);

        // Pinned requests stay on the requested account even if unusable.
        let pinned = resolve_account(&cfg, Some("ghost"), true, &env(&[])).unwrap();
        assert_eq!(pinned.account_id, "ghost");
        assert!(!pinned.configured);
    }

    #[test]
    fn account_id_is_normalized() {
        let cfg = config_json(serde_json::json!({
            "accounts": {"work": {"jid": "w@ex.com", "password": "p"}}
        }));
        let account = resolve_account(&cfg, Some("  Work "), true, &env(&[])).unwrap();
        assert_eq!(account.account_id, "work");
        assert!(account.configured);
    }
}
