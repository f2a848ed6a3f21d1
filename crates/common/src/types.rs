use serde::{Deserialize, Serialize};

/// What kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// One-to-one conversation.
    Direct,
    /// Multi-user conversation (room, group chat).
    Group,
    /// Broadcast channel (read-mostly).
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

/// A single reply chunk produced by the agent runtime.
///
/// Text-only chunks carry an empty `media`; media chunks may still carry
/// caption text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }
}

/// Media referenced by a reply (URL or data URI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    pub mime_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChatType::Direct).unwrap(),
            "\"direct\""
        );
        assert_eq!(serde_json::to_string(&ChatType::Group).unwrap(), "\"group\"");
    }

    #[test]
    fn text_payload_has_no_media() {
        let p = ReplyPayload::text("hi");
        assert_eq!(p.text, "hi");
        assert!(p.media.is_none());
    }
}
