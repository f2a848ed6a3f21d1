//! JID parsing and normalization.
//!
//! Parsing never panics and never throws: invalid input yields `None`.
//! Local part and domain are case-folded; the resource is kept verbatim
//! (resources are case-sensitive per RFC 6120).

/// A parsed Jabber identifier: `local@domain[/resource]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    pub local: String,
    pub domain: String,
    pub resource: Option<String>,
}

impl Jid {
    /// Parse `local@domain[/resource]`. Both `local` and `domain` must be
    /// non-empty; anything else is rejected.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (bare, resource) = match input.split_once('/') {
            Some((bare, res)) if !res.is_empty() => (bare, Some(res.to_string())),
            Some((bare, _)) => (bare, None),
            None => (input, None),
        };
        let (local, domain) = bare.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self {
            local: local.to_lowercase(),
            domain: domain.to_lowercase(),
            resource,
        })
    }

    /// `local@domain`, case-folded.
    pub fn bare(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// Full JID including the resource when present.
    pub fn full(&self) -> String {
        match &self.resource {
            Some(res) => format!("{}@{}/{res}", self.local, self.domain),
            None => self.bare(),
        }
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full())
    }
}

/// Accepted target prefixes, stripped exactly once.
const TARGET_PREFIXES: [&str; 3] = ["xmpp:", "user:", "room:"];

/// Strip one of the accepted target prefixes, if present.
fn strip_target_prefix(input: &str) -> &str {
    for prefix in TARGET_PREFIXES {
        if let Some(rest) = input.strip_prefix(prefix) {
            return rest;
        }
    }
    input
}

/// Normalize any JID-like input to a lowercased bare JID.
///
/// Accepts optional `xmpp:`/`user:`/`room:` prefixes and full JIDs with
/// resources; returns `None` on anything that does not parse as a JID.
/// Idempotent: normalizing a normalized value is a no-op.
pub fn normalize_jid(input: &str) -> Option<String> {
    let stripped = strip_target_prefix(input.trim());
    Jid::parse(stripped).map(|jid| jid.bare())
}

/// Normalize an allowlist entry.
///
/// `"*"` passes through; JID-shaped entries become lowercased bare JIDs;
/// non-JID entries (MUC nicknames) are kept, trimmed and lowercased, so
/// nickname candidates can still match.
pub fn normalize_allow_entry(entry: &str) -> String {
    let trimmed = entry.trim();
    if trimmed == "*" {
        return "*".to_string();
    }
    let stripped = strip_target_prefix(trimmed);
    match Jid::parse(stripped) {
        Some(jid) => jid.bare(),
        None => stripped.to_lowercase(),
    }
}

/// Heuristic room detection: MUC services conventionally live on a
/// `conference.` or `muc.` subdomain. Deployments with unusual component
/// names can override the predicate on the runtime handle.
pub fn is_room_jid(jid: &str) -> bool {
    let Some(parsed) = Jid::parse(strip_target_prefix(jid.trim())) else {
        return false;
    };
    parsed.domain.contains("conference") || parsed.domain.contains("muc")
}

/// Split an occupant JID `room@service/nickname` into `(room, nickname)`.
pub fn split_occupant(occupant: &str) -> Option<(String, String)> {
    let jid = Jid::parse(occupant)?;
    let nick = jid.resource.clone()?;
    Some((jid.bare(), nick))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_jid() {
        let jid = Jid::parse("Alice@Example.COM/Laptop").unwrap();
        assert_eq!(jid.local, "alice");
        assert_eq!(jid.domain, "example.com");
        assert_eq!(jid.resource.as_deref(), Some("Laptop"));
        assert_eq!(jid.bare(), "alice@example.com");
        assert_eq!(jid.full(), "alice@example.com/Laptop");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Jid::parse("").is_none());
        assert!(Jid::parse("no-at-sign").is_none());
        assert!(Jid::parse("@domain").is_none());
        assert!(Jid::parse("user@").is_none());
        assert!(Jid::parse("a@b@c").is_none());
    }

    #[test]
    fn normalize_strips_one_prefix_and_resource() {
        assert_eq!(
            normalize_jid("xmpp:Bob@Example.com/phone").as_deref(),
            Some("bob@example.com")
        );
        assert_eq!(
            normalize_jid("room:lobby@conference.example.com").as_deref(),
            Some("lobby@conference.example.com")
        );
        assert!(normalize_jid("not a jid").is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["user:Bob@Ex.com/r", "alice@example.com", "xmpp:x@y.z"] {
            let once = normalize_jid(input).unwrap();
            assert_eq!(normalize_jid(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn allow_entry_wildcard_passthrough() {
        assert_eq!(normalize_allow_entry("*"), "*");
    }

    #[test]
    fn allow_entry_prefix_stripped_once() {
        assert_eq!(normalize_allow_entry("xmpp:Bob@Ex.com"), "bob@ex.com");
        assert_eq!(normalize_allow_entry("user:Bob@Ex.com"), "bob@ex.com");
        // A nickname entry survives as lowercased text.
        assert_eq!(normalize_allow_entry("SomeNick"), "somenick");
    }

    #[test]
    fn room_jid_heuristic() {
        assert!(is_room_jid("lobby@conference.example.com"));
        assert!(is_room_jid("ops@muc.example.org"));
        assert!(!is_room_jid("alice@example.com"));
        assert!(!is_room_jid("not a jid"));
    }

    #[test]
    fn occupant_split() {
        assert_eq!(
            split_occupant("lobby@conference.example.com/alice"),
            Some(("lobby@conference.example.com".to_string(), "alice".to_string()))
        );
        assert!(split_occupant("lobby@conference.example.com").is_none());
    }
}
