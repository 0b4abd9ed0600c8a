//! STOMP 1.1 frames.
//!
//! # Responsibilities
//! - Encode frames with escaped headers and `content-length` bodies
//! - Parse frames incrementally from a byte buffer
//!
//! # Design Decisions
//! - Newlines between frames are heart-beats and are skipped
//! - `CONNECT`/`CONNECTED` headers are not escaped (STOMP 1.1 rule)
//! - A body with `content-length` may contain NUL bytes

use std::fmt::Write;

/// Upper bound for a single frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub command: String,
    /// Headers in wire order; the first occurrence of a name wins.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A buffer that cannot be a STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    #[error("Invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("Frame body is not terminated by NUL")]
    MissingTerminator,

    #[error("Frame exceeds the maximum frame size")]
    TooLarge,

    #[error("Frame is not UTF-8")]
    NotUtf8,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn escapes_headers(command: &str) -> bool {
        !matches!(command, "CONNECT" | "CONNECTED")
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let escape = Self::escapes_headers(&self.command);
        let mut head = String::new();
        let _ = writeln!(head, "{}", self.command);
        for (name, value) in &self.headers {
            if escape {
                let _ = writeln!(head, "{}:{}", escape_header(name), escape_header(value));
            } else {
                let _ = writeln!(head, "{}:{}", name, value);
            }
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            let _ = writeln!(head, "content-length:{}", self.body.len());
        }
        head.push('\n');

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed, or `None` when
    /// more input is needed. Leading heart-beat newlines are consumed with
    /// the frame.
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let start = buf
            .iter()
            .position(|&b| b != b'\n' && b != b'\r')
            .unwrap_or(buf.len());
        let rest = &buf[start..];
        if rest.is_empty() {
            return Ok(None);
        }

        let Some(head_len) = find_head_end(rest) else {
            return if rest.len() > MAX_FRAME_BYTES {
                Err(FrameError::TooLarge)
            } else {
                Ok(None)
            };
        };
        let head = std::str::from_utf8(&rest[..head_len.0]).map_err(|_| FrameError::NotUtf8)?;
        let body_start = head_len.0 + head_len.1;

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command = lines.next().unwrap_or_default().to_string();
        let escape = Self::escapes_headers(&command);

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: Vec::new(),
        };

        let body_region = &rest[body_start..];
        let consumed_body = match frame.get("content-length") {
            Some(len) => {
                let len: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(len.to_string()))?;
                if len > MAX_FRAME_BYTES {
                    return Err(FrameError::TooLarge);
                }
                if body_region.len() < len + 1 {
                    return Ok(None);
                }
                if body_region[len] != 0 {
                    return Err(FrameError::MissingTerminator);
                }
                frame.body = body_region[..len].to_vec();
                len + 1
            }
            None => match body_region.iter().position(|&b| b == 0) {
                Some(nul) => {
                    frame.body = body_region[..nul].to_vec();
                    nul + 1
                }
                None if body_region.len() > MAX_FRAME_BYTES => return Err(FrameError::TooLarge),
                None => return Ok(None),
            },
        };

        Ok(Some((frame, start + body_start + consumed_body)))
    }
}

/// Incremental frame reader over bytes arriving in chunks.
///
/// Every frame ends in a NUL byte, so the buffer is parsed again only when
/// new input carries one or when it has doubled since the last attempt.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    parse_at: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the connection.
    pub fn extend(&mut self, bytes: &[u8]) {
        if bytes.contains(&0) {
            self.parse_at = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held for frames not yet complete.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` until more input arrives.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < self.parse_at {
            return Ok(None);
        }
        match Frame::parse(&self.buf)? {
            Some((frame, used)) => {
                self.buf.drain(..used);
                self.parse_at = 0;
                Ok(Some(frame))
            }
            None => {
                self.parse_at = self.buf.len().saturating_mul(2);
                Ok(None)
            }
        }
    }
}

/// Offset of the blank line ending the head, and its length.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            if buf.get(i + 1) == Some(&b'\n') {
                return Some((i, 2));
            }
            if buf.get(i + 1) == Some(&b'\r') && buf.get(i + 2) == Some(&b'\n') {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_send_frame() {
        let frame = Frame::new("ACK")
            .header("message-id", "ID:broker-1:2")
            .header("subscription", "sub-0");
        assert_eq!(
            frame.encode(),
            b"ACK\nmessage-id:ID\\cbroker-1\\c2\nsubscription:sub-0\n\n\0".to_vec()
        );
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let frame = Frame::new("CONNECT").header("host", "broker:61613");
        assert_eq!(frame.encode(), b"CONNECT\nhost:broker:61613\n\n\0".to_vec());
    }

    #[test]
    fn test_parse_message_with_heartbeats() {
        let wire = b"\n\nMESSAGE\nmessage-id:ID\\c1\nsubscription:s\ndestination:/topic/routinginfo\n\n:action: :reinit_start\n\0\nrest";
        let (frame, used) = Frame::parse(wire).unwrap().unwrap();
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.get("message-id"), Some("ID:1"));
        assert_eq!(frame.body, b":action: :reinit_start\n");
        assert_eq!(&wire[used..], b"\nrest");
    }

    #[test]
    fn test_parse_content_length_body_with_nul() {
        let wire = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let (frame, used) = Frame::parse(wire).unwrap().unwrap();
        assert_eq!(frame.body, b"a\0b");
        assert_eq!(used, wire.len());
    }

    #[test]
    fn test_parse_needs_more_input() {
        assert_eq!(Frame::parse(b"MESSAGE\nmessage-id:1\n").unwrap(), None);
        assert_eq!(Frame::parse(b"MESSAGE\n\npartial body").unwrap(), None);
        assert_eq!(Frame::parse(b"MESSAGE\ncontent-length:10\n\nshort").unwrap(), None);
        assert_eq!(Frame::parse(b"\n\n").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Frame::parse(b"MESSAGE\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::parse(b"MESSAGE\nbad:\\x\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
        assert!(matches!(
            Frame::parse(b"MESSAGE\ncontent-length:2\n\nabc\0"),
            Err(FrameError::MissingTerminator)
        ));
    }

    #[test]
    fn test_crlf_head() {
        let wire = b"CONNECTED\r\nversion:1.1\r\n\r\n\0";
        let (frame, _) = Frame::parse(wire).unwrap().unwrap();
        assert_eq!(frame.command, "CONNECTED");
        assert_eq!(frame.get("version"), Some("1.1"));
    }

    #[test]
    fn test_decoder_assembles_split_frames() {
        let mut wire = Frame::new("MESSAGE")
            .header("message-id", "1")
            .body(vec![b'x'; 40_000])
            .encode();
        wire.extend(Frame::new("MESSAGE").header("message-id", "2").encode());

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in wire.chunks(1000) {
            decoder.extend(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].body.len(), 40_000);
        assert_eq!(frames[1].get("message-id"), Some("2"));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_enforces_size_limit_without_terminator() {
        let mut decoder = FrameDecoder::new();
        let chunk = vec![b'a'; 1024 * 1024];
        let mut result = Ok(None);
        while decoder.buffered() <= 4 * MAX_FRAME_BYTES {
            decoder.extend(&chunk);
            result = decoder.next_frame();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(FrameError::TooLarge)));
    }
}
