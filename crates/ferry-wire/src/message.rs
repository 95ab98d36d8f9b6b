//! Message format.
//!
//! A frame carries one message: a 4-byte big-endian header length, the JSON
//! header, then the raw body bytes. Splitting header from body lets hooks
//! inspect and rewrite the header before anything looks at the body, and
//! lets a forwarding hop pass the body through untouched.

use crate::error::WireError;
use ferry_types::{Metadata, Rerror};
use serde::{Deserialize, Serialize};

/// Largest frame accepted from or written to a transport (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Kind of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Request expecting a reply.
    Call,
    /// Reply to a call, matched by `seq`.
    Reply,
    /// One-way message.
    Push,
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Sequence, unique per sender within a session.
    pub seq: String,
    pub mtype: MessageType,
    /// Route, optionally followed by `?query`.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub meta: Metadata,
    /// Error status, set on failed replies and handshake answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Rerror>,
}

impl Header {
    pub fn new(seq: impl Into<String>, mtype: MessageType, uri: impl Into<String>) -> Self {
        Self {
            seq: seq.into(),
            mtype,
            uri: uri.into(),
            meta: Metadata::new(),
            status: None,
        }
    }

    /// Route path: the URI up to `?`.
    pub fn path(&self) -> &str {
        route_path(&self.uri)
    }

    /// Query string without the `?`, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q)
    }

    /// Replace the path, keeping the query.
    pub fn set_path(&mut self, path: &str) {
        self.uri = match self.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };
    }
}

/// URI up to `?`.
pub fn route_path(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(path, _)| path)
}

/// A header plus its raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(header: Header, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

/// Encode a message into a frame.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    let header = serde_json::to_vec(&msg.header)?;
    let size = 4 + header.len() + msg.body.len();
    if size > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(size);
    frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&msg.body);
    Ok(frame)
}

/// Decode a frame into a message.
pub fn decode_message(mut frame: Vec<u8>) -> Result<Message, WireError> {
    if frame.len() < 4 {
        return Err(WireError::BadFrame(format!(
            "frame of {} bytes has no header length",
            frame.len()
        )));
    }
    let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let body_start = 4 + header_len;
    if body_start > frame.len() {
        return Err(WireError::BadFrame(format!(
            "header length {header_len} exceeds frame of {} bytes",
            frame.len()
        )));
    }
    let header: Header = serde_json::from_slice(&frame[4..body_start])?;
    let body = frame.split_off(body_start);
    Ok(Message { header, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut header = Header::new("7", MessageType::Call, "/math/add?x=1");
        header.meta.set("trace", "t-1");
        let msg = Message::new(header, b"[1,2]".to_vec());
        let frame = encode_message(&msg).unwrap();
        let decoded = decode_message(frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_failed_reply_carries_status() {
        let mut header = Header::new("3", MessageType::Reply, "/x");
        header.status = Some(Rerror::new(404, "Not Found", "/x"));
        let frame = encode_message(&Message::new(header, Vec::new())).unwrap();
        let decoded = decode_message(frame).unwrap();
        assert_eq!(decoded.header.status.unwrap().code, 404);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn test_path_and_query() {
        let mut header = Header::new("1", MessageType::Push, "/A/B?Key=V");
        assert_eq!(header.path(), "/A/B");
        assert_eq!(header.query(), Some("Key=V"));
        header.set_path("/a/b");
        assert_eq!(header.uri, "/a/b?Key=V");

        let mut bare = Header::new("1", MessageType::Push, "/A");
        bare.set_path("/a");
        assert_eq!(bare.uri, "/a");
        assert_eq!(bare.query(), None);
    }

    #[test]
    fn test_truncated_frames_rejected() {
        assert!(matches!(
            decode_message(vec![0, 0]),
            Err(WireError::BadFrame(_))
        ));
        assert!(matches!(
            decode_message(vec![0, 0, 0, 9, b'{']),
            Err(WireError::BadFrame(_))
        ));
    }

    #[test]
    fn test_header_json_shape() {
        let header = Header::new("1", MessageType::Call, "/echo");
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains(r#""mtype":"call""#));
        assert!(!json.contains("status"));
        assert!(!json.contains("meta"));
    }
}
