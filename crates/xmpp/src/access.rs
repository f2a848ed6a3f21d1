//! The inbound policy engine.
//!
//! Every decision here is a pure function over the resolved inputs: the
//! account config, the effective allowlists (config ∪ pairing store), and
//! the message. Gates run in a fixed order and the first NO wins.

use std::collections::HashMap;

use regex::Regex;

use chatterd_channels::{
    commands::DetectedCommand,
    gating::{DmPolicy, GroupPolicy, allowlist_matches},
};

use crate::{
    config::{RoomConfig, XmppAccountConfig},
    jid::normalize_allow_entry,
};

/// Everything the policy engine looks at for one inbound message.
pub struct PolicyRequest<'a> {
    pub config: &'a XmppAccountConfig,
    /// Local part of the account JID, for the implicit mention pattern.
    pub account_local: &'a str,
    pub is_group: bool,
    pub sender_bare: &'a str,
    pub sender_full: &'a str,
    pub sender_nickname: Option<&'a str>,
    /// Room JID for group messages.
    pub target: &'a str,
    pub body: &'a str,
    pub mention_regexes: &'a [Regex],
    /// Effective DM allowlist: account `allow_from` ∪ pairing store.
    pub dm_allowlist: &'a [String],
    /// Effective group allowlist: account `group_allow_from` ∪ pairing store.
    pub group_allowlist: &'a [String],
    pub command: Option<&'a DetectedCommand>,
}

/// Outcome of the gate cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allow(Grant),
    /// Unknown DM sender under `dm_policy = pairing`: issue a challenge,
    /// then drop the message.
    Pair,
    Deny(DenyReason),
}

/// What an accepted message carries into the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grant {
    /// Set for group messages only.
    pub was_mentioned: Option<bool>,
    pub command_authorized: bool,
    /// Effective room configuration (room keys override the wildcard).
    pub room: Option<RoomConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    DmsDisabled,
    NotAllowlisted,
    GroupsDisabled,
    NoRoomsConfigured,
    RoomNotAllowlisted,
    RoomDisabled,
    MissingMention,
    UnauthorizedCommand,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DmsDisabled => write!(f, "dms disabled"),
            Self::NotAllowlisted => write!(f, "not allowlisted"),
            Self::GroupsDisabled => write!(f, "groups disabled"),
            Self::NoRoomsConfigured => write!(f, "no rooms configured"),
            Self::RoomNotAllowlisted => write!(f, "not allowlisted"),
            Self::RoomDisabled => write!(f, "room disabled"),
            Self::MissingMention => write!(f, "missing-mention"),
            Self::UnauthorizedCommand => write!(f, "unauthorized command"),
        }
    }
}

/// Room lookup: exact key, then case-insensitive key, plus the wildcard.
pub struct RoomMatch<'a> {
    pub room: Option<&'a RoomConfig>,
    pub wildcard: Option<&'a RoomConfig>,
}

pub fn room_match<'a>(
    rooms: &'a HashMap<String, RoomConfig>,
    room_jid: &str,
) -> RoomMatch<'a> {
    let room = rooms.get(room_jid).or_else(|| {
        rooms
            .iter()
            .find(|(key, _)| key.as_str() != "*" && key.eq_ignore_ascii_case(room_jid))
            .map(|(_, cfg)| cfg)
    });
    RoomMatch {
        room,
        wildcard: rooms.get("*"),
    }
}

impl RoomMatch<'_> {
    pub fn is_empty(&self) -> bool {
        self.room.is_none() && self.wildcard.is_none()
    }

    /// Field-wise resolution, room key first then wildcard.
    fn field<T: Clone>(&self, get: impl Fn(&RoomConfig) -> Option<T>) -> Option<T> {
        self.room.and_then(&get).or_else(|| self.wildcard.and_then(&get))
    }

    /// Merged effective room config.
    pub fn effective(&self) -> Option<RoomConfig> {
        if self.is_empty() {
            return None;
        }
        Some(RoomConfig {
            require_mention: self.field(|r| r.require_mention),
            enabled: self.field(|r| r.enabled),
            allow_from: self.field(|r| r.allow_from.clone()),
            tools: self.field(|r| r.tools.clone()),
            tools_by_sender: self.field(|r| r.tools_by_sender.clone()),
            skills: self.field(|r| r.skills.clone()),
            system_prompt: self.field(|r| r.system_prompt.clone()),
        })
    }
}

/// Run the full gate cascade for one message.
pub fn evaluate(req: &PolicyRequest<'_>) -> PolicyDecision {
    if req.is_group {
        evaluate_group(req)
    } else {
        evaluate_dm(req)
    }
}

fn evaluate_dm(req: &PolicyRequest<'_>) -> PolicyDecision {
    let candidates = [req.sender_bare, req.sender_full];
    let matched = allowlist_matches(&candidates, req.dm_allowlist);

    match req.config.dm_policy {
        DmPolicy::Disabled => return PolicyDecision::Deny(DenyReason::DmsDisabled),
        DmPolicy::Open => {},
        DmPolicy::Allowlist if !matched => {
            return PolicyDecision::Deny(DenyReason::NotAllowlisted);
        },
        DmPolicy::Pairing if !matched => return PolicyDecision::Pair,
        DmPolicy::Allowlist | DmPolicy::Pairing => {},
    }

    PolicyDecision::Allow(Grant {
        was_mentioned: None,
        command_authorized: req.command.is_some() && matched,
        room: None,
    })
}

fn evaluate_group(req: &PolicyRequest<'_>) -> PolicyDecision {
    let matched = room_match(&req.config.rooms, req.target);

    match req.config.group_policy {
        GroupPolicy::Disabled => return PolicyDecision::Deny(DenyReason::GroupsDisabled),
        GroupPolicy::Allowlist => {
            if req.config.rooms.is_empty() {
                return PolicyDecision::Deny(DenyReason::NoRoomsConfigured);
            }
            if matched.is_empty() {
                return PolicyDecision::Deny(DenyReason::RoomNotAllowlisted);
            }
        },
        GroupPolicy::Open => {},
    }

    if matched.field(|r| r.enabled) == Some(false) {
        return PolicyDecision::Deny(DenyReason::RoomDisabled);
    }

    let sender_allowed = group_sender_allowed(req, &matched);
    let command_authorized = req.command.is_some() && sender_allowed;
    if req.command.is_some() && !command_authorized {
        // Unauthorized commands never reach agent routing in groups.
        return PolicyDecision::Deny(DenyReason::UnauthorizedCommand);
    }

    let require_mention = matched.field(|r| r.require_mention).unwrap_or(true);
    let mentioned = was_mentioned(req.body, req.mention_regexes, req.account_local);
    if require_mention && !mentioned && !command_authorized {
        return PolicyDecision::Deny(DenyReason::MissingMention);
    }

    PolicyDecision::Allow(Grant {
        was_mentioned: Some(mentioned),
        command_authorized,
        room: matched.effective(),
    })
}

/// Group sender resolution: per-room `allow_from` when present, else the
/// effective group allowlist; with both empty, only an open group policy
/// admits the sender.
fn group_sender_allowed(req: &PolicyRequest<'_>, matched: &RoomMatch<'_>) -> bool {
    let mut candidates = vec![req.sender_bare, req.sender_full];
    if let Some(nick) = req.sender_nickname {
        candidates.push(nick);
    }

    let room_list: Option<Vec<String>> = matched
        .field(|r| r.allow_from.clone())
        .map(|list| list.iter().map(|e| normalize_allow_entry(e)).collect());

    match room_list {
        Some(list) if !list.is_empty() => allowlist_matches(&candidates, &list),
        _ if !req.group_allowlist.is_empty() => {
            allowlist_matches(&candidates, req.group_allowlist)
        },
        _ => req.config.group_policy == GroupPolicy::Open,
    }
}

/// Mention check: any configured pattern, or the account local part as a
/// standalone word with an optional trailing `:` or `,`.
pub fn was_mentioned(body: &str, patterns: &[Regex], account_local: &str) -> bool {
    if patterns.iter().any(|re| re.is_match(body)) {
        return true;
    }
    localpart_word_match(body, account_local)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn localpart_word_match(body: &str, local: &str) -> bool {
    if local.is_empty() {
        return false;
    }
    let body = body.to_lowercase();
    let needle = local.to_lowercase();
    for (idx, _) in body.match_indices(&needle) {
        let before_ok = body[..idx].chars().next_back().is_none_or(|c| !is_word_char(c));
        if !before_ok {
            continue;
        }
        let mut rest = body[idx + needle.len()..].chars();
        match rest.next() {
            None => return true,
            Some(':') | Some(',') => {
                if rest.next().is_none_or(|c| !is_word_char(c)) {
                    return true;
                }
            },
            Some(c) if !is_word_char(c) => return true,
            Some(_) => {},
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> XmppAccountConfig {
        XmppAccountConfig {
            jid: "agent@localhost".into(),
            ..Default::default()
        }
    }

    struct Req {
        config: XmppAccountConfig,
        is_group: bool,
        sender_bare: String,
        sender_full: String,
        sender_nickname: Option<String>,
        target: String,
        body: String,
        dm_allowlist: Vec<String>,
        group_allowlist: Vec<String>,
        command: Option<DetectedCommand>,
    }

    impl Req {
        fn dm(config: XmppAccountConfig) -> Self {
            Self {
                config,
                is_group: false,
                sender_bare: "u@localhost".into(),
                sender_full: "u@localhost/phone".into(),
                sender_nickname: None,
                target: "u@localhost".into(),
                body: "hi".into(),
                dm_allowlist: vec![],
                group_allowlist: vec![],
                command: None,
            }
        }

        fn group(config: XmppAccountConfig) -> Self {
            Self {
                config,
                is_group: true,
                sender_bare: "r@conference.localhost".into(),
                sender_full: "r@conference.localhost/u".into(),
                sender_nickname: Some("u".into()),
                target: "r@conference.localhost".into(),
                body: "hello room".into(),
                dm_allowlist: vec![],
                group_allowlist: vec![],
                command: None,
            }
        }

        fn eval(&self) -> PolicyDecision {
            evaluate(&PolicyRequest {
                config: &self.config,
                account_local: "agent",
                is_group: self.is_group,
                sender_bare: &self.sender_bare,
                sender_full: &self.sender_full,
                sender_nickname: self.sender_nickname.as_deref(),
                target: &self.target,
                body: &self.body,
                mention_regexes: &[],
                dm_allowlist: &self.dm_allowlist,
                group_allowlist: &self.group_allowlist,
                command: self.command.as_ref(),
            })
        }
    }

    fn room(require_mention: Option<bool>) -> RoomConfig {
        RoomConfig {
            require_mention,
            ..Default::default()
        }
    }

    #[test]
    fn dm_open_allows_anyone() {
        let mut cfg = base_config();
        cfg.dm_policy = DmPolicy::Open;
        cfg.allow_from = vec!["*".into()];
        let mut req = Req::dm(cfg);
        req.dm_allowlist = vec!["*".into()];
        assert!(matches!(req.eval(), PolicyDecision::Allow(_)));
    }

    #[test]
    fn dm_disabled_denies() {
        let mut cfg = base_config();
        cfg.dm_policy = DmPolicy::Disabled;
        assert_eq!(
            Req::dm(cfg).eval(),
            PolicyDecision::Deny(DenyReason::DmsDisabled)
        );
    }

    #[test]
    fn dm_allowlist_miss_is_silent_deny() {
        let mut cfg = base_config();
        cfg.dm_policy = DmPolicy::Allowlist;
        let mut req = Req::dm(cfg);
        req.dm_allowlist = vec!["someone-else@localhost".into()];
        assert_eq!(
            req.eval(),
            PolicyDecision::Deny(DenyReason::NotAllowlisted)
        );
    }

    #[test]
    fn dm_pairing_miss_requests_pairing() {
        let req = Req::dm(base_config());
        assert_eq!(req.eval(), PolicyDecision::Pair);
    }

    #[test]
    fn dm_pairing_hit_allows() {
        let mut req = Req::dm(base_config());
        req.dm_allowlist = vec!["u@localhost".into()];
        assert!(matches!(req.eval(), PolicyDecision::Allow(_)));
    }

    #[test]
    fn dm_matches_full_jid_candidate() {
        let mut req = Req::dm(base_config());
        req.dm_allowlist = vec!["u@localhost/phone".into()];
        assert!(matches!(req.eval(), PolicyDecision::Allow(_)));
    }

    #[test]
    fn group_disabled_denies() {
        let mut cfg = base_config();
        cfg.group_policy = GroupPolicy::Disabled;
        assert_eq!(
            Req::group(cfg).eval(),
            PolicyDecision::Deny(DenyReason::GroupsDisabled)
        );
    }

    #[test]
    fn group_allowlist_without_rooms_denies() {
        let cfg = base_config();
        let decision = Req::group(cfg).eval();
        assert_eq!(decision, PolicyDecision::Deny(DenyReason::NoRoomsConfigured));
        assert_eq!(
            DenyReason::NoRoomsConfigured.to_string(),
            "no rooms configured"
        );
    }

    #[test]
    fn group_allowlist_unmatched_room_denies() {
        let mut cfg = base_config();
        cfg.rooms
            .insert("other@conference.localhost".into(), room(None));
        assert_eq!(
            Req::group(cfg).eval(),
            PolicyDecision::Deny(DenyReason::RoomNotAllowlisted)
        );
    }

    #[test]
    fn room_match_is_case_insensitive_with_wildcard_fallback() {
        let mut rooms = HashMap::new();
        rooms.insert("Lobby@Conference.Localhost".to_string(), room(Some(true)));
        rooms.insert("*".to_string(), room(Some(false)));

        let m = room_match(&rooms, "lobby@conference.localhost");
        assert!(m.room.is_some());
        assert_eq!(m.field(|r| r.require_mention), Some(true));

        let m = room_match(&rooms, "elsewhere@conference.localhost");
        assert!(m.room.is_none());
        assert_eq!(m.field(|r| r.require_mention), Some(false));
    }

    #[test]
    fn disabled_room_denies() {
        let mut cfg = base_config();
        cfg.rooms.insert(
            "r@conference.localhost".into(),
            RoomConfig {
                enabled: Some(false),
                ..Default::default()
            },
        );
        assert_eq!(
            Req::group(cfg).eval(),
            PolicyDecision::Deny(DenyReason::RoomDisabled)
        );
    }

    #[test]
    fn wildcard_room_without_mention_requirement_allows() {
        let mut cfg = base_config();
        cfg.group_policy = GroupPolicy::Open;
        cfg.rooms.insert("*".into(), room(Some(false)));
        let decision = Req::group(cfg).eval();
        let PolicyDecision::Allow(grant) = decision else {
            panic!("expected allow, got {decision:?}");
        };
        assert_eq!(grant.was_mentioned, Some(false));
    }

    #[test]
    fn mention_required_by_default_and_missing() {
        let mut cfg = base_config();
        cfg.rooms.insert("r@conference.localhost".into(), room(None));
        assert_eq!(
            Req::group(cfg).eval(),
            PolicyDecision::Deny(DenyReason::MissingMention)
        );
        assert_eq!(DenyReason::MissingMention.to_string(), "missing-mention");
    }

    #[test]
    fn localpart_mention_with_trailing_colon_passes_gate() {
        let mut cfg = base_config();
        cfg.rooms
            .insert("r@conference.localhost".into(), room(Some(true)));
        let mut req = Req::group(cfg);
        req.body = "agent: help".into();
        assert!(matches!(req.eval(), PolicyDecision::Allow(_)));
    }

    #[test]
    fn localpart_inside_word_is_not_a_mention() {
        assert!(!was_mentioned("management meeting", &[], "agent"));
        assert!(was_mentioned("hey Agent, hello", &[], "agent"));
        assert!(was_mentioned("agent", &[], "agent"));
        assert!(!was_mentioned("agents", &[], "agent"));
    }

    #[test]
    fn configured_pattern_counts_as_mention() {
        let patterns = vec![Regex::new(r"(?i)@bot\b").unwrap()];
        assert!(was_mentioned("hello @bot", &patterns, "agent-x"));
        assert!(!was_mentioned("hello all", &patterns, "agent-x"));
    }

    #[test]
    fn authorized_command_bypasses_mention_gate() {
        let mut cfg = base_config();
        cfg.rooms
            .insert("r@conference.localhost".into(), room(Some(true)));
        let mut req = Req::group(cfg);
        req.body = "/new".into();
        req.group_allowlist = vec!["admin@localhost".into()];
        req.sender_bare = "admin@localhost".into();
        req.sender_full = "r@conference.localhost/admin".into();
        req.command = Some(DetectedCommand {
            name: "new".into(),
            args: String::new(),
        });

        let decision = req.eval();
        let PolicyDecision::Allow(grant) = decision else {
            panic!("expected allow, got {decision:?}");
        };
        assert!(grant.command_authorized);
    }

    #[test]
    fn unauthorized_group_command_is_blocked() {
        let mut cfg = base_config();
        cfg.group_policy = GroupPolicy::Open;
        cfg.rooms.insert("*".into(), room(Some(false)));
        let mut req = Req::group(cfg);
        req.body = "/new".into();
        req.group_allowlist = vec!["admin@localhost".into()];
        req.command = Some(DetectedCommand {
            name: "new".into(),
            args: String::new(),
        });
        assert_eq!(
            req.eval(),
            PolicyDecision::Deny(DenyReason::UnauthorizedCommand)
        );
    }

    #[test]
    fn per_room_allowlist_overrides_group_allowlist() {
        let mut cfg = base_config();
        cfg.rooms.insert(
            "r@conference.localhost".into(),
            RoomConfig {
                require_mention: Some(false),
                allow_from: Some(vec!["u".into()]),
                ..Default::default()
            },
        );
        let mut req = Req::group(cfg);
        req.body = "/new".into();
        // Group list would deny, but the room list matches the nickname.
        req.group_allowlist = vec!["somebody-else@localhost".into()];
        req.command = Some(DetectedCommand {
            name: "new".into(),
            args: String::new(),
        });
        let PolicyDecision::Allow(grant) = req.eval() else {
            panic!("expected allow");
        };
        assert!(grant.command_authorized);
    }

    #[test]
    fn empty_lists_admit_senders_only_under_open_policy() {
        // Allowlist policy + configured room + no sender lists: plain
        // messages still flow (mention-gated), but commands are blocked.
        let mut cfg = base_config();
        cfg.rooms
            .insert("r@conference.localhost".into(), room(Some(false)));
        let mut req = Req::group(cfg);
        req.body = "/new".into();
        req.command = Some(DetectedCommand {
            name: "new".into(),
            args: String::new(),
        });
        assert_eq!(
            req.eval(),
            PolicyDecision::Deny(DenyReason::UnauthorizedCommand)
        );

        // Same shape under an open policy: the command is authorized.
        let mut cfg = base_config();
        cfg.group_policy = GroupPolicy::Open;
        cfg.rooms
            .insert("r@conference.localhost".into(), room(Some(false)));
        let mut req = Req::group(cfg);
        req.body = "/new".into();
        req.command = Some(DetectedCommand {
            name: "new".into(),
            args: String::new(),
        });
        assert!(matches!(req.eval(), PolicyDecision::Allow(_)));
    }

    #[test]
    fn grant_carries_effective_room_config() {
        let mut cfg = base_config();
        cfg.rooms.insert(
            "r@conference.localhost".into(),
            RoomConfig {
                require_mention: Some(false),
                skills: Some(vec!["search".into()]),
                ..Default::default()
            },
        );
        cfg.rooms.insert(
            "*".into(),
            RoomConfig {
                system_prompt: Some("be brief".into()),
                ..Default::default()
            },
        );
        let req = Req::group(cfg);
        let PolicyDecision::Allow(grant) = req.eval() else {
            panic!("expected allow");
        };
        let room = grant.room.unwrap();
        assert_eq!(room.skills, Some(vec!["search".into()]));
        assert_eq!(room.system_prompt, Some("be brief".into()));
    }
}
