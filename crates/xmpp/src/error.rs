use thiserror::Error;

/// Which delivery path a reply failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Stream,
    Block,
}

impl std::fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Account configuration is unusable (missing JID/password, bad policy).
    #[error("xmpp config: {0}")]
    Config(String),

    /// Connect failure, timeout, or closed stream.
    #[error("xmpp transport: {0}")]
    Transport(String),

    /// SASL authentication was rejected by the server.
    #[error("xmpp auth: {0}")]
    Auth(String),

    /// An inbound stanza could not be decoded. Logged and dropped, never
    /// fatal to the connection.
    #[error("stanza decode: {0}")]
    StanzaDecode(String),

    /// An outbound target is not a JID.
    #[error("invalid xmpp target: {0}")]
    InvalidTarget(String),

    /// The pairing store failed; the pairing reply is skipped.
    #[error("pairing store: {0}")]
    PairingStore(String),

    /// A reply delivery callback failed.
    #[error("dispatch ({kind}): {message}")]
    Dispatch { kind: DispatchKind, message: String },
}

impl Error {
    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    #[must_use]
    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::StanzaDecode(message.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
