use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use {regex::Regex, tokio_util::sync::CancellationToken, tracing::warn};

use crate::{accounts::ResolvedAccount, client::XmppClientHandle, presence::PresenceTracker};

/// Shared account state map.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Per-account runtime state. The supervisor exclusively owns the client
/// task; this is the shared view other components read.
pub struct AccountState {
    pub account_id: String,
    pub account: ResolvedAccount,
    pub client: XmppClientHandle,
    pub cancel: CancellationToken,
    /// Availability per contact; per-account, never shared.
    pub presence: Arc<Mutex<PresenceTracker>>,
    /// Compiled `mention_patterns`; rebuilt on config updates.
    pub mention_regexes: Arc<Vec<Regex>>,
}

/// Compile configured mention patterns, skipping invalid ones.
pub fn compile_mention_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, "ignoring invalid mention pattern: {e}");
                None
            },
        })
        .collect()
}
