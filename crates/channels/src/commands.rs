//! Control-command detection for inbound message bodies.

/// A recognized control command with its argument tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCommand {
    pub name: String,
    pub args: String,
}

/// Host-provided command detector. A channel that exposes no detector does
/// not accept text commands at all.
pub trait CommandDetector: Send + Sync {
    fn detect(&self, body: &str) -> Option<DetectedCommand>;
}

/// Detects `/name args` and `!name args` for a fixed command list.
pub struct PrefixCommandDetector {
    commands: Vec<String>,
}

impl PrefixCommandDetector {
    pub fn new(commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

impl CommandDetector for PrefixCommandDetector {
    fn detect(&self, body: &str) -> Option<DetectedCommand> {
        let trimmed = body.trim();
        let rest = trimmed.strip_prefix('/').or_else(|| trimmed.strip_prefix('!'))?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next()?.to_lowercase();
        if name.is_empty() || !self.commands.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            return None;
        }
        Some(DetectedCommand {
            name,
            args: parts.next().unwrap_or("").trim().to_string(),
        })
    }
}
