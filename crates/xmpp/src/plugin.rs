//! The XMPP channel plugin and its runtime handle.
//!
//! `XmppRuntime` carries every host service the adapter consumes. It is
//! built once at registration and injected into constructors — there is no
//! process-wide singleton to reach for.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::{info, warn},
};

use {
    chatterd_channels::{
        activity::ActivityRecorder,
        commands::CommandDetector,
        dispatch::AgentDispatcher,
        message_log::MessageLog,
        pairing::PairingStore,
        plugin::{
            ChannelCapabilities, ChannelEventSink, ChannelHealthSnapshot, ChannelOutbound,
            ChannelPlugin, ChannelStatus,
        },
        routing::RouteResolver,
        sessions::SessionStore,
    },
    chatterd_common::ChatType,
};

use crate::{
    accounts::{EnvSource, ProcessEnv, resolve_from_config},
    client::{XmppClientConfig, XmppEvent, spawn_client},
    config::XmppAccountConfig,
    jid, monitor, pairing,
    presence::PresenceState,
    state::{AccountStateMap, compile_mention_patterns},
};

/// Cache TTL for probe results.
const PROBE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Probes use a shorter connect timeout than regular clients.
const PROBE_CONNECT_TIMEOUT_MS: u64 = 8_000;

/// Host services injected into the adapter.
pub struct XmppRuntime {
    pub pairing: Arc<dyn PairingStore>,
    pub routing: Arc<dyn RouteResolver>,
    pub sessions: Arc<dyn SessionStore>,
    pub activity: Arc<dyn ActivityRecorder>,
    pub dispatcher: Arc<dyn AgentDispatcher>,
    /// Absent detector means the channel accepts no text commands.
    pub commands: Option<Arc<dyn CommandDetector>>,
    pub message_log: Option<Arc<dyn MessageLog>>,
    pub event_sink: Option<Arc<dyn ChannelEventSink>>,
    pub env: Arc<dyn EnvSource>,
    /// Room detection predicate; replaceable for deployments whose MUC
    /// component is not named `conference.*`/`muc.*`.
    pub is_room_jid: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl XmppRuntime {
    pub fn new(
        pairing: Arc<dyn PairingStore>,
        routing: Arc<dyn RouteResolver>,
        sessions: Arc<dyn SessionStore>,
        activity: Arc<dyn ActivityRecorder>,
        dispatcher: Arc<dyn AgentDispatcher>,
    ) -> Self {
        Self {
            pairing,
            routing,
            sessions,
            activity,
            dispatcher,
            commands: None,
            message_log: None,
            event_sink: None,
            env: Arc::new(ProcessEnv),
            is_room_jid: Arc::new(|jid| jid::is_room_jid(jid)),
        }
    }

    pub fn with_command_detector(mut self, detector: Arc<dyn CommandDetector>) -> Self {
        self.commands = Some(detector);
        self
    }

    pub fn with_message_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.message_log = Some(log);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn ChannelEventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn with_room_predicate(
        mut self,
        predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> Self {
        self.is_room_jid = predicate;
        self
    }
}

/// XMPP channel plugin.
pub struct XmppPlugin {
    runtime: Arc<XmppRuntime>,
    accounts: AccountStateMap,
    outbound: crate::outbound::XmppOutbound,
    probe_cache: RwLock<HashMap<String, (ChannelHealthSnapshot, Instant)>>,
}

impl XmppPlugin {
    pub fn new(runtime: Arc<XmppRuntime>) -> Self {
        let accounts: AccountStateMap = Arc::new(RwLock::new(HashMap::new()));
        let outbound = crate::outbound::XmppOutbound {
            accounts: Arc::clone(&accounts),
            runtime: Arc::clone(&runtime),
        };
        Self {
            runtime,
            accounts,
            outbound,
            probe_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a shared reference to the outbound sender.
    pub fn shared_outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(crate::outbound::XmppOutbound {
            accounts: Arc::clone(&self.accounts),
            runtime: Arc::clone(&self.runtime),
        })
    }

    /// List all active account IDs.
    pub fn account_ids(&self) -> Vec<String> {
        let accounts = self.accounts.read().unwrap();
        accounts.keys().cloned().collect()
    }

    /// Get the config for a specific account (serialized to JSON).
    pub fn account_config(&self, account_id: &str) -> Option<serde_json::Value> {
        let accounts = self.accounts.read().unwrap();
        accounts
            .get(account_id)
            .and_then(|s| serde_json::to_value(&s.account.config).ok())
    }

    /// Update the in-memory config for an account without reconnecting.
    /// Allowlist and policy changes apply to the next inbound message.
    pub fn update_account_config(&self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let parsed: XmppAccountConfig = serde_json::from_value(config)?;
        let mut accounts = self.accounts.write().unwrap();
        if let Some(state) = accounts.get_mut(account_id) {
            state.mention_regexes = Arc::new(compile_mention_patterns(&parsed.mention_patterns));
            state.account.config = parsed;
            Ok(())
        } else {
            Err(anyhow::anyhow!("account not found: {account_id}"))
        }
    }

    /// Last observed presence of a contact, per account.
    pub fn presence_of(&self, account_id: &str, bare_jid: &str) -> Option<PresenceState> {
        let accounts = self.accounts.read().unwrap();
        accounts
            .get(account_id)
            .and_then(|s| s.presence.lock().unwrap().get(bare_jid).cloned())
    }

    /// Pairing adapter hook: the host calls this after operator approval.
    pub async fn notify_approval(&self, id: &str) -> Result<()> {
        pairing::notify_approval(&self.accounts, &self.runtime, id).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelPlugin for XmppPlugin {
    fn id(&self) -> &str {
        "xmpp"
    }

    fn name(&self) -> &str {
        "XMPP"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            chat_types: vec![ChatType::Direct, ChatType::Group],
            media: true,
            block_streaming: true,
            edit: true,
            reply: true,
        }
    }

    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let parsed: XmppAccountConfig = serde_json::from_value(config)?;
        let account = resolve_from_config(account_id, parsed, self.runtime.env.as_ref());

        info!(account_id, jid = %account.jid, "starting xmpp account");
        monitor::start_account(
            account,
            Arc::clone(&self.accounts),
            Arc::clone(&self.runtime),
        )
        .await?;
        Ok(())
    }

    async fn stop_account(&mut self, account_id: &str) -> Result<()> {
        let cancel = {
            let accounts = self.accounts.read().unwrap();
            accounts.get(account_id).map(|s| s.cancel.clone())
        };

        if let Some(cancel) = cancel {
            info!(account_id, "stopping xmpp account");
            cancel.cancel();
            let mut accounts = self.accounts.write().unwrap();
            accounts.remove(account_id);
        } else {
            warn!(account_id, "xmpp account not found");
        }

        Ok(())
    }

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        Some(&self.outbound)
    }

    fn status(&self) -> Option<&dyn ChannelStatus> {
        Some(self)
    }
}

#[async_trait]
impl ChannelStatus for XmppPlugin {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        // Return cached result if fresh enough.
        if let Ok(cache) = self.probe_cache.read()
            && let Some((snap, ts)) = cache.get(account_id)
            && ts.elapsed() < PROBE_CACHE_TTL
        {
            return Ok(snap.clone());
        }

        let account = {
            let accounts = self.accounts.read().unwrap();
            accounts.get(account_id).map(|s| s.account.clone())
        };

        let result = match account {
            Some(account) => probe_account(account_id, &account).await,
            None => ChannelHealthSnapshot {
                connected: false,
                account_id: account_id.to_string(),
                details: Some("account not started".into()),
            },
        };

        if let Ok(mut cache) = self.probe_cache.write() {
            cache.insert(account_id.to_string(), (result.clone(), Instant::now()));
        }

        Ok(result)
    }
}

/// Transient connect-and-authenticate probe with the short probe timeout.
async fn probe_account(
    account_id: &str,
    account: &crate::accounts::ResolvedAccount,
) -> ChannelHealthSnapshot {
    let config = match XmppClientConfig::from_account(account) {
        Ok(mut config) => {
            config.auto_join_rooms.clear();
            config.connect_timeout = Duration::from_millis(PROBE_CONNECT_TIMEOUT_MS);
            config
        },
        Err(e) => {
            return ChannelHealthSnapshot {
                connected: false,
                account_id: account_id.to_string(),
                details: Some(e.to_string()),
            };
        },
    };

    let (_handle, mut events, cancel) = spawn_client(config);
    let outcome = loop {
        match events.recv().await {
            Some(XmppEvent::Online { jid }) => break Ok(jid),
            Some(XmppEvent::Error(e)) => break Err(e),
            Some(XmppEvent::Offline) => break Err("client went offline".to_string()),
            Some(_) => {},
            None => break Err("client stopped".to_string()),
        }
    };
    cancel.cancel();

    match outcome {
        Ok(jid) => ChannelHealthSnapshot {
            connected: true,
            account_id: account_id.to_string(),
            details: Some(format!("Connected as {jid}")),
        },
        Err(e) => ChannelHealthSnapshot {
            connected: false,
            account_id: account_id.to_string(),
            details: Some(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chatterd_channels::{
            Result as ChannelResult,
            activity::ActivityEntry,
            dispatch::{AgentContext, DispatchOptions, ReplySender},
            pairing::MemoryPairingStore,
            registry::ChannelRegistry,
            routing::{Peer, ResolvedRoute},
        },
        secrecy::Secret,
        tokio_util::sync::CancellationToken,
    };

    use crate::{
        accounts::resolve_from_config,
        client::XmppClientHandle,
        presence::PresenceTracker,
        state::AccountState,
    };

    struct NullRouting;
    #[async_trait]
    impl RouteResolver for NullRouting {
        async fn resolve(
            &self,
            channel: &str,
            account_id: &str,
            peer: &Peer,
        ) -> ChannelResult<ResolvedRoute> {
            Ok(ResolvedRoute {
                agent_id: "main".into(),
                session_key: format!("{channel}:{account_id}:{}", peer.id),
            })
        }
    }

    struct NullSessions;
    #[async_trait]
    impl SessionStore for NullSessions {
        async fn last_activity(&self, _key: &str) -> ChannelResult<Option<i64>> {
            Ok(None)
        }
        async fn record_inbound(&self, _key: &str, _at: i64) -> ChannelResult<()> {
            Ok(())
        }
    }

    struct NullActivity;
    #[async_trait]
    impl ActivityRecorder for NullActivity {
        async fn record(&self, _entry: ActivityEntry) -> ChannelResult<()> {
            Ok(())
        }
    }

    struct NullDispatcher;
    #[async_trait]
    impl AgentDispatcher for NullDispatcher {
        async fn dispatch(
            &self,
            _ctx: AgentContext,
            _opts: DispatchOptions,
            _replies: ReplySender,
        ) -> ChannelResult<()> {
            Ok(())
        }
    }

    fn test_runtime() -> Arc<XmppRuntime> {
        Arc::new(XmppRuntime::new(
            Arc::new(MemoryPairingStore::new()),
            Arc::new(NullRouting),
            Arc::new(NullSessions),
            Arc::new(NullActivity),
            Arc::new(NullDispatcher),
        ))
    }

    /// Build a minimal `AccountState` for unit tests (no network calls).
    fn test_account_state(account_id: &str, config: XmppAccountConfig) -> AccountState {
        let (client, rx) = XmppClientHandle::test_pair(8);
        std::mem::forget(rx);
        let account = resolve_from_config(
            account_id,
            config,
            &HashMap::<String, String>::new(),
        );
        AccountState {
            account_id: account_id.into(),
            mention_regexes: Arc::new(compile_mention_patterns(
                &account.config.mention_patterns,
            )),
            account,
            client,
            cancel: CancellationToken::new(),
            presence: Arc::new(std::sync::Mutex::new(PresenceTracker::new())),
        }
    }

    fn base_config() -> XmppAccountConfig {
        XmppAccountConfig {
            jid: "agent@localhost".into(),
            password: Secret::new("pw".into()),
            ..Default::default()
        }
    }

    #[test]
    fn plugin_registers_with_expected_surface() {
        let plugin = XmppPlugin::new(test_runtime());
        let caps = plugin.capabilities();
        assert!(caps.media && caps.block_streaming && caps.edit && caps.reply);
        assert_eq!(caps.chat_types, vec![ChatType::Direct, ChatType::Group]);

        let mut registry = ChannelRegistry::new();
        registry.register(Box::new(plugin));
        assert_eq!(registry.list(), vec!["xmpp"]);
        assert!(registry.get("xmpp").unwrap().outbound().is_some());
        assert!(registry.get("xmpp").unwrap().status().is_some());
    }

    #[test]
    fn update_account_config_applies_immediately() {
        let plugin = XmppPlugin::new(test_runtime());
        {
            let mut map = plugin.accounts.write().unwrap();
            map.insert("test".into(), test_account_state("test", base_config()));
        }

        let new_config = serde_json::json!({
            "jid": "agent@localhost",
            "password": "pw",
            "dm_policy": "allowlist",
            "allow_from": ["alice@localhost"],
            "mention_patterns": ["(?i)@agent"],
        });
        plugin.update_account_config("test", new_config).unwrap();

        let map = plugin.accounts.read().unwrap();
        let state = map.get("test").unwrap();
        assert_eq!(
            state.account.config.allow_from,
            vec!["alice@localhost".to_string()]
        );
        assert_eq!(state.mention_regexes.len(), 1);
    }

    /// Hot config updates must not cancel the running client — a reconnect
    /// would re-join rooms and re-read pending history.
    #[test]
    fn security_update_config_does_not_cancel_client() {
        let plugin = XmppPlugin::new(test_runtime());
        let witness = {
            let mut map = plugin.accounts.write().unwrap();
            let state = test_account_state("test", base_config());
            let witness = state.cancel.clone();
            map.insert("test".into(), state);
            witness
        };

        plugin
            .update_account_config(
                "test",
                serde_json::json!({"jid": "agent@localhost", "password": "pw"}),
            )
            .unwrap();
        assert!(!witness.is_cancelled());
    }

    #[test]
    fn update_account_config_nonexistent_account_errors() {
        let plugin = XmppPlugin::new(test_runtime());
        let result = plugin.update_account_config("ghost", serde_json::json!({}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_account_cancels_and_removes() {
        let mut plugin = XmppPlugin::new(test_runtime());
        let witness = {
            let mut map = plugin.accounts.write().unwrap();
            let state = test_account_state("test", base_config());
            let witness = state.cancel.clone();
            map.insert("test".into(), state);
            witness
        };

        plugin.stop_account("test").await.unwrap();
        assert!(witness.is_cancelled());
        assert!(plugin.account_ids().is_empty());
    }

    #[tokio::test]
    async fn probe_reports_unstarted_accounts() {
        let plugin = XmppPlugin::new(test_runtime());
        let snap = plugin.probe("nope").await.unwrap();
        assert!(!snap.connected);
        assert_eq!(snap.details.as_deref(), Some("account not started"));
    }
}
