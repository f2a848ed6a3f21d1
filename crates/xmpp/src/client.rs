//! The XMPP client: TCP/STARTTLS transport, SASL PLAIN, resource binding,
//! and the stanza loop.
//!
//! States: Idle → Connecting → Authenticating → Bound → Online → Offline.
//! The client never retries internally; reconnecting is the supervisor's
//! call. Stanza decode failures are logged and dropped — only transport
//! and auth failures end the connection.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use {
    secrecy::{ExposeSecret, Secret},
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::TcpStream,
        sync::mpsc,
        time::timeout,
    },
    tokio_rustls::TlsConnector,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    accounts::ResolvedAccount,
    error::{Error, Result},
    jid::Jid,
    stanza::{
        self, ChatState, Element, MessageStanza, MessageType, PresenceStanza, StreamItem,
        StreamParser, ns,
    },
};

/// Wait between the MUC join presence and the owner-config submit that
/// unlocks a freshly created room.
pub const MUC_UNLOCK_DELAY_MS: u64 = 500;

/// Everything the client needs to bring one account online.
#[derive(Clone)]
pub struct XmppClientConfig {
    /// Full JID including the resource to bind.
    pub jid: Jid,
    pub password: Secret<String>,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// MUC nickname, also used to drop our own room echoes.
    pub nickname: String,
    pub auto_join_rooms: Vec<String>,
    /// Cap on requested room history, when configured.
    pub history_limit: Option<u32>,
    pub connect_timeout: Duration,
}

impl XmppClientConfig {
    /// Build a client config from a resolved account.
    pub fn from_account(account: &ResolvedAccount) -> Result<Self> {
        let mut jid = Jid::parse(&account.jid)
            .ok_or_else(|| Error::Config(format!("account {} has no usable JID", account.account_id)))?;
        jid.resource = Some(account.resource.clone());
        Ok(Self {
            jid,
            password: account.password.clone(),
            host: account.host.clone(),
            port: account.port,
            tls: account.tls,
            nickname: account.resource.clone(),
            auto_join_rooms: account.config.auto_join_rooms.clone(),
            history_limit: account.config.history_limit,
            connect_timeout: Duration::from_millis(account.config.connect_timeout_ms),
        })
    }
}

/// Events surfaced to the account supervisor, in receive order.
#[derive(Debug, Clone)]
pub enum XmppEvent {
    Online { jid: String },
    Offline,
    Error(String),
    Message(MessageStanza),
    Presence(PresenceStanza),
}

/// Connection lifecycle. `Online` is the only state that accepts sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Idle = 0,
    Connecting = 1,
    Authenticating = 2,
    Bound = 3,
    Online = 4,
    Offline = 5,
}

impl From<u8> for ClientState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Bound,
            4 => Self::Online,
            5 => Self::Offline,
            _ => Self::Idle,
        }
    }
}

/// Cheap cloneable sender side of a running client.
#[derive(Clone)]
pub struct XmppClientHandle {
    out: mpsc::Sender<String>,
    state: Arc<AtomicU8>,
}

impl XmppClientHandle {
    pub fn state(&self) -> ClientState {
        ClientState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Online
    }

    /// Send a message stanza; returns the generated stanza id.
    pub async fn send_message(&self, to: &str, body: &str, type_: MessageType) -> Result<String> {
        let (el, id) = stanza::message(to, body, type_);
        self.send_xml(el.to_xml()).await?;
        Ok(id)
    }

    pub async fn send_chat_state(&self, to: &str, state: ChatState) -> Result<()> {
        self.send_xml(stanza::chat_state(to, state).to_xml()).await
    }

    pub async fn send_receipt(&self, to: &str, id: &str) -> Result<()> {
        self.send_xml(stanza::receipt(to, id).to_xml()).await
    }

    pub async fn send_presence(
        &self,
        type_: Option<&str>,
        to: Option<&str>,
        status: Option<&str>,
        show: Option<&str>,
    ) -> Result<()> {
        self.send_xml(stanza::presence(type_, to, status, show).to_xml())
            .await
    }

    async fn send_xml(&self, xml: String) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::transport("client is offline"));
        }
        self.out
            .send(xml)
            .await
            .map_err(|_| Error::transport("client stream closed"))
    }

    /// Detached handle whose writes land in the returned receiver. Unit
    /// tests use this to observe outbound stanzas without a connection.
    #[cfg(test)]
    pub(crate) fn test_pair(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (out, rx) = mpsc::channel(capacity);
        (
            Self {
                out,
                state: Arc::new(AtomicU8::new(ClientState::Online as u8)),
            },
            rx,
        )
    }
}

/// Spawn a client task for `config`. Events arrive on the returned receiver;
/// the token stops the client and closes the stream gracefully.
pub fn spawn_client(
    config: XmppClientConfig,
) -> (XmppClientHandle, mpsc::Receiver<XmppEvent>, CancellationToken) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    let state = Arc::new(AtomicU8::new(ClientState::Idle as u8));
    let cancel = CancellationToken::new();

    let handle = XmppClientHandle {
        out: out_tx.clone(),
        state: Arc::clone(&state),
    };

    let task_state = Arc::clone(&state);
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let result = run_client(&config, &events_tx, out_tx, out_rx, &task_state, &task_cancel).await;
        task_state.store(ClientState::Offline as u8, Ordering::SeqCst);
        if let Err(e) = result {
            warn!(jid = %config.jid, "xmpp client failed: {e}");
            let _ = events_tx.send(XmppEvent::Error(e.to_string())).await;
        }
        let _ = events_tx.send(XmppEvent::Offline).await;
    });

    (handle, events_rx, cancel)
}

// ── Connection internals ────────────────────────────────────────────────────

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

struct Negotiated {
    stream: Box<dyn AsyncStream>,
    parser: StreamParser,
    bound_jid: String,
}

async fn run_client(
    config: &XmppClientConfig,
    events: &mpsc::Sender<XmppEvent>,
    out_tx: mpsc::Sender<String>,
    mut out_rx: mpsc::Receiver<String>,
    state: &AtomicU8,
    cancel: &CancellationToken,
) -> Result<()> {
    state.store(ClientState::Connecting as u8, Ordering::SeqCst);
    let negotiated = timeout(config.connect_timeout, negotiate(config, state))
        .await
        .map_err(|_| {
            Error::transport(format!(
                "connect to {}:{} timed out after {:?}",
                config.host, config.port, config.connect_timeout
            ))
        })??;
    let Negotiated {
        mut stream,
        mut parser,
        bound_jid,
    } = negotiated;

    // Online: announce presence, then join rooms through the writer queue so
    // the unlock delay never blocks stanza processing.
    write_xml(&mut stream, &stanza::presence(None, None, None, None).to_xml()).await?;
    let (mut reader, mut writer) = tokio::io::split(stream);
    state.store(ClientState::Online as u8, Ordering::SeqCst);
    let _ = events
        .send(XmppEvent::Online {
            jid: bound_jid.clone(),
        })
        .await;
    info!(jid = %bound_jid, "xmpp client online");

    spawn_room_joins(
        out_tx,
        config.auto_join_rooms.clone(),
        config.nickname.clone(),
        config.history_limit,
    );

    let mut buf = [0u8; 8192];
    loop {
        // Flush queued outbound stanzas before anything else — transient
        // senders cancel immediately after queueing their message.
        while let Ok(xml) = out_rx.try_recv() {
            write_xml(&mut writer, &xml).await?;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = writer.write_all(b"</stream:stream>").await;
                let _ = writer.flush().await;
                debug!(jid = %bound_jid, "xmpp client stopped");
                return Ok(());
            },
            outbound = out_rx.recv() => {
                match outbound {
                    Some(xml) => write_xml(&mut writer, &xml).await?,
                    None => return Ok(()),
                }
            },
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Err(Error::transport("stream closed by server"));
                }
                parser.feed(&buf[..n])?;
                while let Some(item) = parser.poll() {
                    match item {
                        StreamItem::Stanza(el) => dispatch_stanza(config, &el, events).await,
                        StreamItem::StreamClose => {
                            return Err(Error::transport("stream closed by server"));
                        },
                        StreamItem::StreamOpen(_) => {},
                    }
                }
            },
        }
    }
}

/// Join each configured room: presence, a cooperative 500 ms pause, then the
/// owner-config submit that unlocks newly created rooms.
fn spawn_room_joins(
    out: mpsc::Sender<String>,
    rooms: Vec<String>,
    nickname: String,
    history_limit: Option<u32>,
) {
    if rooms.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for room in rooms {
            debug!(%room, "joining muc room");
            if out
                .send(stanza::muc_join(&room, &nickname, history_limit).to_xml())
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(MUC_UNLOCK_DELAY_MS)).await;
            let iq_id = format!("cfg-{}", chrono::Utc::now().timestamp_millis());
            if out
                .send(stanza::muc_owner_unlock(&room, &iq_id).to_xml())
                .await
                .is_err()
            {
                return;
            }
        }
    });
}

async fn dispatch_stanza(
    config: &XmppClientConfig,
    el: &Element,
    events: &mpsc::Sender<XmppEvent>,
) {
    match el.local_name() {
        "message" => match MessageStanza::decode(el) {
            Ok(msg) => {
                if msg.body.as_deref().is_none_or(|b| b.trim().is_empty()) {
                    debug!("ignoring message without body");
                    return;
                }
                if msg.type_ == MessageType::Groupchat
                    && let Some(from) = msg.from.as_deref()
                    && let Some((_, nick)) = crate::jid::split_occupant(from)
                    && nick == config.nickname
                {
                    debug!("skipping own muc echo");
                    return;
                }
                let _ = events.send(XmppEvent::Message(msg)).await;
            },
            Err(e) => warn!("dropping undecodable message stanza: {e}"),
        },
        "presence" => match PresenceStanza::decode(el) {
            Ok(pres) => {
                let _ = events.send(XmppEvent::Presence(pres)).await;
            },
            Err(e) => warn!("dropping undecodable presence stanza: {e}"),
        },
        "iq" => {
            debug!(id = ?el.get_attr("id"), "iq stanza (unhandled)");
        },
        other => {
            debug!(name = other, "ignoring unexpected stanza");
        },
    }
}

/// Connect, negotiate TLS and SASL, and bind the resource.
async fn negotiate(config: &XmppClientConfig, state: &AtomicU8) -> Result<Negotiated> {
    debug!(host = %config.host, port = config.port, "connecting");
    let mut tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
    let mut parser = StreamParser::new();
    let header = stanza::stream_header(&config.jid.domain);

    write_xml(&mut tcp, &header).await?;
    let features = read_features(&mut tcp, &mut parser).await?;

    let mut stream: Box<dyn AsyncStream> = if config.tls {
        if features.find_ns("starttls", ns::TLS).is_none() {
            return Err(Error::transport("server does not offer STARTTLS"));
        }
        write_xml(&mut tcp, &stanza::starttls().to_xml()).await?;
        let proceed = next_stanza(&mut tcp, &mut parser).await?;
        if proceed.local_name() != "proceed" {
            return Err(Error::transport(format!(
                "STARTTLS refused: <{}/>",
                proceed.name
            )));
        }
        let server_name = rustls::pki_types::ServerName::try_from(config.jid.domain.clone())
            .map_err(|_| Error::transport(format!("invalid TLS name: {}", config.jid.domain)))?;
        let tls = tls_connector()?
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::transport(format!("TLS handshake failed: {e}")))?;
        Box::new(tls)
    } else {
        Box::new(tcp)
    };

    // A fresh stream follows the TLS upgrade; without TLS the first stream
    // continues into SASL.
    let features = if config.tls {
        parser = StreamParser::new();
        write_xml(&mut stream, &header).await?;
        read_features(&mut stream, &mut parser).await?
    } else {
        features
    };

    // SASL PLAIN.
    state.store(ClientState::Authenticating as u8, Ordering::SeqCst);
    let offers_plain = features
        .find_ns("mechanisms", ns::SASL)
        .map(|m| {
            m.children
                .iter()
                .any(|c| c.local_name() == "mechanism" && c.text.trim() == "PLAIN")
        })
        .unwrap_or(false);
    if !offers_plain {
        return Err(Error::Auth("server does not offer SASL PLAIN".into()));
    }
    write_xml(
        &mut stream,
        &stanza::sasl_plain(&config.jid.local, config.password.expose_secret()).to_xml(),
    )
    .await?;
    let response = next_stanza(&mut stream, &mut parser).await?;
    match response.local_name() {
        "success" => {},
        "failure" => {
            let condition = response
                .children
                .first()
                .map(|c| c.local_name().to_string())
                .unwrap_or_else(|| "not-authorized".into());
            return Err(Error::Auth(condition));
        },
        other => {
            return Err(Error::transport(format!(
                "unexpected SASL response: <{other}/>"
            )));
        },
    }

    // Stream restart, then resource binding.
    parser = StreamParser::new();
    write_xml(&mut stream, &header).await?;
    read_features(&mut stream, &mut parser).await?;

    let iq_id = format!("bind-{}", uuid::Uuid::new_v4());
    let resource = config.jid.resource.as_deref().unwrap_or_default();
    write_xml(&mut stream, &stanza::bind_iq(resource, &iq_id).to_xml()).await?;
    let reply = next_stanza(&mut stream, &mut parser).await?;
    if reply.local_name() != "iq" || reply.get_attr("type") != Some("result") {
        return Err(Error::transport("resource binding failed"));
    }
    let bound_jid = reply
        .find_ns("bind", ns::BIND)
        .and_then(|b| b.find("jid"))
        .map(|j| j.text.trim().to_string())
        .filter(|j| !j.is_empty())
        .unwrap_or_else(|| config.jid.full());
    state.store(ClientState::Bound as u8, Ordering::SeqCst);

    Ok(Negotiated {
        stream,
        parser,
        bound_jid,
    })
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

async fn write_xml<S: AsyncWrite + Unpin>(stream: &mut S, xml: &str) -> Result<()> {
    stream.write_all(xml.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read until the next complete stanza, skipping stream opens.
async fn next_stanza<S: AsyncRead + Unpin>(
    stream: &mut S,
    parser: &mut StreamParser,
) -> Result<Element> {
    let mut buf = [0u8; 8192];
    loop {
        while let Some(item) = parser.poll() {
            match item {
                StreamItem::Stanza(el) => return Ok(el),
                StreamItem::StreamOpen(_) => {},
                StreamItem::StreamClose => {
                    return Err(Error::transport("stream closed during negotiation"));
                },
            }
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::transport("connection closed during negotiation"));
        }
        parser.feed(&buf[..n])?;
    }
}

async fn read_features<S: AsyncRead + Unpin>(
    stream: &mut S,
    parser: &mut StreamParser,
) -> Result<Element> {
    let el = next_stanza(stream, parser).await?;
    if el.local_name() != "features" {
        return Err(Error::transport(format!(
            "expected stream features, got <{}/>",
            el.name
        )));
    }
    Ok(el)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    const SERVER_OPEN: &str = "<?xml version='1.0'?><stream:stream from='localhost' id='s1' \
         xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>";

    fn test_config(port: u16) -> XmppClientConfig {
        XmppClientConfig {
            jid: Jid::parse("agent@localhost/chatterd").unwrap(),
            password: Secret::new("pw".into()),
            host: "127.0.0.1".into(),
            port,
            tls: false,
            nickname: "chatterd".into(),
            auto_join_rooms: vec!["lobby@conference.localhost".into()],
            history_limit: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    async fn read_until(sock: &mut TcpStream, collected: &mut String, needle: &str) {
        let mut buf = [0u8; 4096];
        while !collected.contains(needle) {
            let n = sock.read(&mut buf).await.expect("server read");
            assert!(n > 0, "peer closed while waiting for {needle}");
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    #[tokio::test]
    async fn full_session_against_scripted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = String::new();

            read_until(&mut sock, &mut seen, "<stream:stream").await;
            sock.write_all(
                format!(
                    "{SERVER_OPEN}<stream:features><mechanisms \
                     xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                     <mechanism>PLAIN</mechanism></mechanisms></stream:features>"
                )
                .as_bytes(),
            )
            .await
            .unwrap();

            read_until(&mut sock, &mut seen, "</auth>").await;
            sock.write_all(b"<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
                .await
                .unwrap();

            seen.clear();
            read_until(&mut sock, &mut seen, "<stream:stream").await;
            sock.write_all(
                format!(
                    "{SERVER_OPEN}<stream:features>\
                     <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>"
                )
                .as_bytes(),
            )
            .await
            .unwrap();

            read_until(&mut sock, &mut seen, "xmpp-bind").await;
            sock.write_all(
                b"<iq type='result' id='b1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                  <jid>agent@localhost/chatterd</jid></bind></iq>",
            )
            .await
            .unwrap();

            // Initial presence, the room join, and (after 500 ms) the unlock.
            read_until(&mut sock, &mut seen, "lobby@conference.localhost/chatterd").await;
            read_until(&mut sock, &mut seen, "muc#owner").await;

            // Exercise the inbound path: a bodyless state, our own echo, a
            // real groupchat line, and a DM.
            sock.write_all(
                b"<message from='u@localhost/r' type='chat'>\
                  <composing xmlns='http://jabber.org/protocol/chatstates'/></message>\
                  <message from='lobby@conference.localhost/chatterd' type='groupchat'>\
                  <body>echo</body></message>\
                  <message from='lobby@conference.localhost/alice' type='groupchat'>\
                  <body>hello room</body></message>\
                  <message from='u@localhost/r' type='chat' id='m1'><body>hi</body></message>",
            )
            .await
            .unwrap();

            // Outbound through the handle.
            read_until(&mut sock, &mut seen, "are you there").await;
            seen
        });

        let (handle, mut events, cancel) = spawn_client(test_config(port));

        let online = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let XmppEvent::Online { jid } = online else {
            panic!("expected online, got {online:?}");
        };
        assert_eq!(jid, "agent@localhost/chatterd");
        assert!(handle.is_ready());

        let first = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let XmppEvent::Message(msg) = first else {
            panic!("expected groupchat message, got {first:?}");
        };
        assert_eq!(msg.type_, MessageType::Groupchat);
        assert_eq!(msg.body.as_deref(), Some("hello room"));

        let second = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let XmppEvent::Message(msg) = second else {
            panic!("expected chat message, got {second:?}");
        };
        assert_eq!(msg.body.as_deref(), Some("hi"));
        assert_eq!(msg.id.as_deref(), Some("m1"));

        let id = handle
            .send_message("u@localhost", "are you there", MessageType::Chat)
            .await
            .unwrap();
        assert!(!id.is_empty());

        let seen = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(seen.contains("type='chat'"));

        cancel.cancel();
        loop {
            let ev = timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(ev, XmppEvent::Offline) {
                break;
            }
        }
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn connect_timeout_cancels_pending_start() {
        // A listener that accepts and then stays silent.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut config = test_config(port);
        config.connect_timeout = Duration::from_millis(300);
        let (handle, mut events, _cancel) = spawn_client(config);

        let first = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let XmppEvent::Error(err) = first else {
            panic!("expected error, got {first:?}");
        };
        assert!(err.contains("timed out"));

        let second = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, XmppEvent::Offline));
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn sasl_failure_surfaces_as_auth_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = String::new();
            read_until(&mut sock, &mut seen, "<stream:stream").await;
            sock.write_all(
                format!(
                    "{SERVER_OPEN}<stream:features><mechanisms \
                     xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                     <mechanism>PLAIN</mechanism></mechanisms></stream:features>"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
            read_until(&mut sock, &mut seen, "</auth>").await;
            sock.write_all(
                b"<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                  <not-authorized/></failure>",
            )
            .await
            .unwrap();
        });

        let (_handle, mut events, _cancel) = spawn_client(test_config(port));
        let first = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let XmppEvent::Error(err) = first else {
            panic!("expected error, got {first:?}");
        };
        assert!(err.contains("not-authorized"), "got: {err}");
    }

    #[tokio::test]
    async fn send_while_offline_fails_immediately() {
        let (handle, rx) = XmppClientHandle::test_pair(4);
        handle
            .state
            .store(ClientState::Offline as u8, Ordering::SeqCst);
        assert_eq!(handle.state(), ClientState::Offline);
        let err = handle
            .send_message("a@b", "x", MessageType::Chat)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("offline"));
        drop(rx);
    }
}
