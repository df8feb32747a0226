use std::{fmt, str::FromStr};

use thiserror::Error;

/// Errors produced while decoding a STOMP frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is missing its command line")]
    MissingCommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    #[error("invalid escape sequence in '{0}'")]
    InvalidEscape(String),
    #[error("invalid content-length '{0}'")]
    InvalidContentLength(String),
    #[error("frame body is not terminated by NUL")]
    Unterminated,
}

/// STOMP 1.2 commands used by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    // CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompCommand {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => return Err(FrameError::UnknownCommand(other.to_owned())),
        })
    }
}

/// One STOMP frame. Headers keep wire order; the first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Result of decoding one WebSocket text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Payload held only end-of-line bytes.
    HeartBeat,
    Frame(Frame),
}

impl Frame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(
        host: &str,
        heart_beat: (u64, u64),
        authorization: Option<String>,
    ) -> Self {
        let mut frame = Self::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1));
        if let Some(authorization) = authorization {
            frame = frame.header("Authorization", authorization);
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(StompCommand::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    /// Serialize to wire text, terminated by NUL. A `content-length` header is
    /// added for non-empty bodies unless one is already set.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            push_header_part(&mut out, name, escape);
            out.push(':');
            push_header_part(&mut out, value, escape);
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode one WebSocket payload holding a single frame or a heart-beat.
pub fn decode(text: &str) -> Result<Decoded, FrameError> {
    let text = text.trim_start_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(Decoded::HeartBeat);
    }

    let (command_line, mut rest) = split_line(text).ok_or(FrameError::MissingCommand)?;
    let command: StompCommand = command_line.parse()?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = split_line(rest).ok_or(FrameError::Unterminated)?;
        rest = next;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_owned()))?;
        headers.push((
            decode_header_part(name, escape)?,
            decode_header_part(value, escape)?,
        ));
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let body = match content_length {
        Some(length) => {
            let body = rest
                .get(..length)
                .ok_or_else(|| FrameError::InvalidContentLength(length.to_string()))?;
            if !rest[length..].starts_with('\0') {
                return Err(FrameError::Unterminated);
            }
            body
        }
        None => {
            let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
            &rest[..end]
        }
    };

    Ok(Decoded::Frame(Frame {
        command,
        headers,
        body: body.to_owned(),
    }))
}

/// Heart-beat intervals (send, receive) in milliseconds agreed with the peer.
///
/// `client` is what we offered in CONNECT; `server` is the `heart-beat`
/// header of CONNECTED. Zero disables that direction.
pub fn negotiate_heart_beat(client: (u64, u64), server: Option<&str>) -> (u64, u64) {
    let (server_send, server_receive) = server.and_then(parse_heart_beat).unwrap_or((0, 0));
    let outgoing = if client.0 == 0 || server_receive == 0 {
        0
    } else {
        client.0.max(server_receive)
    };
    let incoming = if client.1 == 0 || server_send == 0 {
        0
    } else {
        client.1.max(server_send)
    };
    (outgoing, incoming)
}

fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (send, receive) = value.split_once(',')?;
    Some((send.trim().parse().ok()?, receive.trim().parse().ok()?))
}

fn split_line(text: &str) -> Option<(&str, &str)> {
    let end = text.find('\n')?;
    let line = text[..end].strip_suffix('\r').unwrap_or(&text[..end]);
    Some((line, &text[end + 1..]))
}

fn push_header_part(out: &mut String, value: &str, escape: bool) {
    if !escape {
        out.push_str(value);
        return;
    }
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn decode_header_part(raw: &str, escape: bool) -> Result<String, FrameError> {
    if !escape || !raw.contains('\\') {
        return Ok(raw.to_owned());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            _ => return Err(FrameError::InvalidEscape(raw.to_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        match decode(text).expect("frame should decode") {
            Decoded::Frame(frame) => frame,
            Decoded::HeartBeat => panic!("expected a frame"),
        }
    }

    #[test]
    fn encodes_connect_without_escaping() {
        let wire = Frame::connect("chat.example.org", (10_000, 10_000), Some("Bearer a:b".into()))
            .encode();
        assert_eq!(
            wire,
            "CONNECT\naccept-version:1.2\nhost:chat.example.org\nheart-beat:10000,10000\nAuthorization:Bearer a:b\n\n\0"
        );
    }

    #[test]
    fn send_carries_content_length_in_bytes() {
        let wire = Frame::send("/app/chat.sendMessage", "héllo").encode();
        assert!(wire.contains("content-length:6\n"));
        assert!(wire.ends_with("\n\nhéllo\0"));
    }

    #[test]
    fn decodes_message_frame() {
        let parsed = frame(
            "MESSAGE\ndestination:/topic/public\nsubscription:sub-0\nmessage-id:1\n\n{\"content\":\"x\"}\0",
        );
        assert_eq!(parsed.command, StompCommand::Message);
        assert_eq!(parsed.get("destination"), Some("/topic/public"));
        assert_eq!(parsed.body, "{\"content\":\"x\"}");
    }

    #[test]
    fn honours_content_length_with_embedded_nul() {
        let parsed = frame("MESSAGE\ncontent-length:3\n\na\0b\0\n");
        assert_eq!(parsed.body, "a\0b");
    }

    #[test]
    fn tolerates_crlf_and_trailing_eol() {
        let parsed = frame("\r\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0\n");
        assert_eq!(parsed.command, StompCommand::Connected);
        assert_eq!(parsed.get("version"), Some("1.2"));
    }

    #[test]
    fn bare_eol_is_heart_beat() {
        assert_eq!(decode("\n"), Ok(Decoded::HeartBeat));
        assert_eq!(decode("\r\n\n"), Ok(Decoded::HeartBeat));
    }

    #[test]
    fn header_escaping_round_trips() {
        let outbound = Frame::new(StompCommand::Send)
            .header("destination", "/queue/a:b")
            .header("note", "line\nbreak\\slash")
            .body("x");
        let wire = outbound.encode();
        assert!(wire.contains("destination:/queue/a\\cb\n"));

        let parsed = frame(&wire);
        assert_eq!(parsed.get("destination"), Some("/queue/a:b"));
        assert_eq!(parsed.get("note"), Some("line\nbreak\\slash"));
        assert_eq!(parsed.body, "x");
    }

    #[test]
    fn first_repeated_header_wins() {
        let parsed = frame("MESSAGE\ndestination:/topic/a\ndestination:/topic/b\n\n\0");
        assert_eq!(parsed.get("destination"), Some("/topic/a"));
    }

    #[test]
    fn rejects_broken_frames() {
        assert_eq!(
            decode("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand("HELLO".into()))
        );
        assert_eq!(decode("MESSAGE\n\nbody"), Err(FrameError::Unterminated));
        assert!(matches!(
            decode("MESSAGE\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            decode("MESSAGE\nbad:\\t\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
        assert!(matches!(
            decode("MESSAGE\ncontent-length:99\n\nabc\0"),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn negotiates_heart_beat_per_direction() {
        assert_eq!(
            negotiate_heart_beat((10_000, 10_000), Some("5000,20000")),
            (20_000, 10_000)
        );
        assert_eq!(negotiate_heart_beat((10_000, 10_000), Some("0,0")), (0, 0));
        assert_eq!(negotiate_heart_beat((0, 10_000), Some("4000,4000")), (0, 10_000));
        assert_eq!(negotiate_heart_beat((10_000, 10_000), None), (0, 0));
    }
}
