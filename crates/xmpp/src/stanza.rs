//! Stanza-level encode/decode.
//!
//! The wire side is a stream of XML elements below a long-lived
//! `<stream:stream>` root. [`StreamParser`] turns raw bytes into complete
//! top-level elements without ever blocking on partial input; typed wrappers
//! decode the stanzas the adapter consumes. Decode failures are values —
//! a bad stanza is dropped by the caller, never a connection error.

use std::collections::VecDeque;

use {
    base64::Engine,
    quick_xml::{Reader, escape::escape, events::Event},
};

use crate::error::{Error, Result};

/// Namespaces used on the wire.
pub mod ns {
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    pub const CLIENT: &str = "jabber:client";
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const MUC_OWNER: &str = "http://jabber.org/protocol/muc#owner";
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
    pub const DATA_FORMS: &str = "jabber:x:data";
    pub const CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";
    pub const RECEIPTS: &str = "urn:xmpp:receipts";
    pub const DELAY: &str = "urn:xmpp:delay";
    pub const CORRECT: &str = "urn:xmpp:message-correct:0";
    pub const REPLY: &str = "urn:xmpp:reply:0";
}

// ── Generic element tree ────────────────────────────────────────────────────

/// A decoded XML element. Attribute order is preserved for serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Element name without a namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// First child with the given local name.
    pub fn find(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// First child with the given local name and `xmlns` attribute.
    pub fn find_ns(&self, local: &str, xmlns: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.local_name() == local && c.get_attr("xmlns") == Some(xmlns))
    }

    /// Serialize with XML escaping. Empty elements self-close.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("='");
            out.push_str(&escape(v.as_str()));
            out.push('\'');
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return out;
        }
        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            out.push_str(&child.to_xml());
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
        out
    }
}

// ── Incremental stream parsing ──────────────────────────────────────────────

/// Upper bound on a single buffered stanza. Anything larger is a decode
/// error, which the client logs and recovers from by dropping the stream.
pub const MAX_STANZA_BYTES: usize = 256 * 1024;

/// A completed item from the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// The `<stream:stream>` open tag (attributes only, never closed early).
    StreamOpen(Element),
    /// A complete depth-one stanza.
    Stanza(Element),
    /// The peer closed the stream (`</stream:stream>`).
    StreamClose,
}

/// Incremental parser: feed raw bytes, poll complete stream items.
///
/// Partial input is kept buffered until more bytes arrive; whitespace
/// keepalives between stanzas are discarded.
#[derive(Default)]
pub struct StreamParser {
    buf: Vec<u8>,
    ready: VecDeque<StreamItem>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        self.drain_complete()?;
        if self.buf.len() > MAX_STANZA_BYTES {
            return Err(Error::decode("stanza exceeds maximum buffered size"));
        }
        Ok(())
    }

    pub fn poll(&mut self) -> Option<StreamItem> {
        self.ready.pop_front()
    }

    fn drain_complete(&mut self) -> Result<()> {
        // A multi-byte character can be split across reads; parse only the
        // valid UTF-8 prefix and keep the tail buffered.
        let valid_len = match std::str::from_utf8(&self.buf) {
            Ok(s) => s.len(),
            Err(e) => e.valid_up_to(),
        };
        let text = std::str::from_utf8(&self.buf[..valid_len]).unwrap_or_default();

        let mut reader = Reader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();
        let mut consumed = 0usize;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let el = element_from_start(&start)?;
                    if stack.is_empty() && el.local_name() == "stream" {
                        self.ready.push_back(StreamItem::StreamOpen(el));
                        consumed = reader.buffer_position() as usize;
                    } else {
                        stack.push(el);
                    }
                },
                Ok(Event::Empty(start)) => {
                    let el = element_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => {
                            self.ready.push_back(StreamItem::Stanza(el));
                            consumed = reader.buffer_position() as usize;
                        },
                    }
                },
                Ok(Event::End(_)) => match stack.pop() {
                    Some(el) => match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => {
                            self.ready.push_back(StreamItem::Stanza(el));
                            consumed = reader.buffer_position() as usize;
                        },
                    },
                    None => break,
                },
                Ok(Event::Text(t)) => match stack.last_mut() {
                    Some(top) => {
                        let chunk = t
                            .unescape()
                            .map_err(|e| Error::decode(format!("bad character data: {e}")))?;
                        top.text.push_str(&chunk);
                    },
                    // Whitespace keepalive between stanzas.
                    None => consumed = reader.buffer_position() as usize,
                },
                Ok(Event::CData(t)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                    }
                },
                Ok(Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_)) => {
                    if stack.is_empty() {
                        consumed = reader.buffer_position() as usize;
                    }
                },
                Ok(Event::Eof) => break,
                // Incomplete tail (or an unmatched `</stream:stream>`, which
                // the reader cannot pair): stop and wait for more bytes.
                Err(_) => break,
            }
        }

        self.buf.drain(..consumed);

        // The stream close tag is unmatched from the parser's perspective —
        // its open tag was consumed long ago. Recognize it directly.
        let tail = std::str::from_utf8(&self.buf)
            .unwrap_or_default()
            .trim_start();
        if tail.starts_with("</stream:stream>") || tail.starts_with("</stream>") {
            self.ready.push_back(StreamItem::StreamClose);
            self.buf.clear();
        }

        Ok(())
    }
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::decode(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::decode(format!("bad attribute value: {e}")))?
            .into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

// ── Typed message stanza ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageType {
    #[default]
    Normal,
    Chat,
    Groupchat,
    Headline,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Chat => "chat",
            Self::Groupchat => "groupchat",
            Self::Headline => "headline",
            Self::Error => "error",
        }
    }

    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("chat") => Self::Chat,
            Some("groupchat") => Self::Groupchat,
            Some("headline") => Self::Headline,
            Some("error") => Self::Error,
            _ => Self::Normal,
        }
    }
}

/// Decoded `<message/>` with the extensions the adapter understands.
#[derive(Debug, Clone, Default)]
pub struct MessageStanza {
    pub from: Option<String>,
    pub to: Option<String>,
    pub id: Option<String>,
    pub type_: MessageType,
    pub body: Option<String>,
    pub subject: Option<String>,
    /// XEP-0203 delayed delivery, converted to epoch milliseconds.
    pub delay_stamp: Option<i64>,
    /// XEP-0308: id of the message this one corrects.
    pub replace_id: Option<String>,
    /// XEP-0461: thread origin this message replies to.
    pub reply_to: Option<String>,
    /// XEP-0184: sender asked for a delivery receipt.
    pub receipt_request: bool,
}

impl MessageStanza {
    pub fn decode(el: &Element) -> Result<Self> {
        if el.local_name() != "message" {
            return Err(Error::decode(format!("expected <message/>, got <{}/>", el.name)));
        }
        let mut msg = Self {
            from: el.get_attr("from").map(str::to_string),
            to: el.get_attr("to").map(str::to_string),
            id: el.get_attr("id").map(str::to_string),
            type_: MessageType::parse(el.get_attr("type")),
            ..Default::default()
        };
        msg.body = el.find("body").map(|b| b.text.clone());
        msg.subject = el.find("subject").map(|s| s.text.clone());
        if let Some(delay) = el.find_ns("delay", ns::DELAY)
            && let Some(stamp) = delay.get_attr("stamp")
        {
            // A malformed stamp degrades to "no delay", not a dropped stanza.
            msg.delay_stamp = chrono::DateTime::parse_from_rfc3339(stamp)
                .ok()
                .map(|dt| dt.timestamp_millis());
        }
        if let Some(replace) = el.find_ns("replace", ns::CORRECT) {
            msg.replace_id = replace.get_attr("id").map(str::to_string);
        }
        if let Some(reply) = el.find_ns("reply", ns::REPLY) {
            msg.reply_to = reply.get_attr("to").map(str::to_string);
        }
        msg.receipt_request = el.find_ns("request", ns::RECEIPTS).is_some();
        Ok(msg)
    }
}

// ── Typed presence stanza ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Available,
    Unavailable,
    Error,
    Other,
}

#[derive(Debug, Clone)]
pub struct PresenceStanza {
    pub from: Option<String>,
    pub type_: PresenceType,
    pub show: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i8>,
    /// XEP-0045 status codes from `<x xmlns="…muc#user">` (110 = self).
    pub muc_statuses: Vec<u16>,
}

impl PresenceStanza {
    pub fn decode(el: &Element) -> Result<Self> {
        if el.local_name() != "presence" {
            return Err(Error::decode(format!(
                "expected <presence/>, got <{}/>",
                el.name
            )));
        }
        let type_ = match el.get_attr("type") {
            None => PresenceType::Available,
            Some("unavailable") => PresenceType::Unavailable,
            Some("error") => PresenceType::Error,
            Some(_) => PresenceType::Other,
        };
        let muc_statuses = el
            .find_ns("x", ns::MUC_USER)
            .map(|x| {
                x.children
                    .iter()
                    .filter(|c| c.local_name() == "status")
                    .filter_map(|c| c.get_attr("code").and_then(|code| code.parse().ok()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            from: el.get_attr("from").map(str::to_string),
            type_,
            show: el.find("show").map(|s| s.text.clone()),
            status: el.find("status").map(|s| s.text.clone()),
            priority: el.find("priority").and_then(|p| p.text.trim().parse().ok()),
            muc_statuses,
        })
    }

    pub fn is_self_presence(&self) -> bool {
        self.muc_statuses.contains(&110)
    }
}

// ── Chat states (XEP-0085) ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Composing,
    Paused,
    Active,
    Inactive,
    Gone,
}

impl ChatState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composing => "composing",
            Self::Paused => "paused",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Gone => "gone",
        }
    }
}

// ── Encoders ────────────────────────────────────────────────────────────────

/// `<message to id type><body>…</body></message>` with a fresh UUID id.
/// Returns the element and its id so callers can correlate.
pub fn message(to: &str, body: &str, type_: MessageType) -> (Element, String) {
    let id = uuid::Uuid::new_v4().to_string();
    let el = Element::new("message")
        .attr("to", to)
        .attr("id", id.clone())
        .attr("type", type_.as_str())
        .child(Element::new("body").with_text(body.trim()));
    (el, id)
}

/// XEP-0085 chat-state notification.
pub fn chat_state(to: &str, state: ChatState) -> Element {
    Element::new("message")
        .attr("to", to)
        .attr("type", MessageType::Chat.as_str())
        .child(Element::new(state.as_str()).attr("xmlns", ns::CHAT_STATES))
}

/// XEP-0184 delivery receipt for a received message id.
pub fn receipt(to: &str, id: &str) -> Element {
    Element::new("message")
        .attr("to", to)
        .child(Element::new("received").attr("xmlns", ns::RECEIPTS).attr("id", id))
}

/// `<presence/>` with optional type, target, status, and show children.
pub fn presence(
    type_: Option<&str>,
    to: Option<&str>,
    status: Option<&str>,
    show: Option<&str>,
) -> Element {
    let mut el = Element::new("presence");
    if let Some(t) = type_ {
        el = el.attr("type", t);
    }
    if let Some(to) = to {
        el = el.attr("to", to);
    }
    if let Some(show) = show {
        el = el.child(Element::new("show").with_text(show));
    }
    if let Some(status) = status {
        el = el.child(Element::new("status").with_text(status));
    }
    el
}

/// XEP-0045 join: directed presence to `room/nickname` with the MUC marker
/// and an optional history request cap.
pub fn muc_join(room: &str, nickname: &str, history_limit: Option<u32>) -> Element {
    let mut x = Element::new("x").attr("xmlns", ns::MUC);
    if let Some(limit) = history_limit {
        x = x.child(Element::new("history").attr("maxstanzas", limit.to_string()));
    }
    Element::new("presence")
        .attr("to", format!("{room}/{nickname}"))
        .child(x)
}

/// Owner configuration submit that accepts the default room form. Unlocks a
/// freshly created room (XEP-0045 §10.1) and is a no-op for existing rooms.
pub fn muc_owner_unlock(room: &str, iq_id: &str) -> Element {
    Element::new("iq")
        .attr("to", room)
        .attr("type", "set")
        .attr("id", iq_id)
        .child(
            Element::new("query").attr("xmlns", ns::MUC_OWNER).child(
                Element::new("x")
                    .attr("xmlns", ns::DATA_FORMS)
                    .attr("type", "submit"),
            ),
        )
}

/// Opening of a client-to-server stream.
pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xmlns='{}' xmlns:stream='{}'>",
        escape(domain),
        ns::CLIENT,
        ns::STREAM
    )
}

pub fn starttls() -> Element {
    Element::new("starttls").attr("xmlns", ns::TLS)
}

/// SASL PLAIN initial response: base64(`\0user\0password`).
pub fn sasl_plain(username: &str, password: &str) -> Element {
    let payload = format!("\0{username}\0{password}");
    Element::new("auth")
        .attr("xmlns", ns::SASL)
        .attr("mechanism", "PLAIN")
        .with_text(base64::engine::general_purpose::STANDARD.encode(payload))
}

/// Resource binding request.
pub fn bind_iq(resource: &str, iq_id: &str) -> Element {
    Element::new("iq")
        .attr("type", "set")
        .attr("id", iq_id)
        .child(
            Element::new("bind")
                .attr("xmlns", ns::BIND)
                .child(Element::new("resource").with_text(resource)),
        )
}
