use serde::{Deserialize, Serialize};

/// DM access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Unknown senders get a pairing challenge; approved senders pass.
    #[default]
    Pairing,
    /// Only senders on the allowlist.
    Allowlist,
    /// Anyone can DM the bot.
    Open,
    /// DMs disabled.
    Disabled,
}

/// Group access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Only configured groups/rooms.
    #[default]
    Allowlist,
    /// Bot responds in all groups.
    Open,
    /// Groups disabled.
    Disabled,
}

/// Check whether any of `candidates` matches one of the allowlist `entries`.
///
/// Matching is exact and case-insensitive; the single entry `"*"` matches
/// everything. An empty entry list matches nothing — policies decide what an
/// empty list means, not this function.
pub fn allowlist_matches<C: AsRef<str>, E: AsRef<str>>(candidates: &[C], entries: &[E]) -> bool {
    if entries.is_empty() {
        return false;
    }
    if entries.iter().any(|e| e.as_ref() == "*") {
        return true;
    }
    candidates.iter().any(|c| {
        let cand = c.as_ref().to_lowercase();
        entries.iter().any(|e| e.as_ref().to_lowercase() == cand)
    })
}
