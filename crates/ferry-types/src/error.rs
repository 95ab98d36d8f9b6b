//! Structured RPC errors and the status code table.
//!
//! An [`Rerror`] is the error that crosses the wire: it rides in a message
//! header and is what a remote caller ultimately observes. Codes in
//! `[100, 200)` are reserved for internal handshake/transport failures and
//! must not leak past a forwarding hop (see [`Rerror::is_internal`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unknown error.
pub const CODE_UNKNOWN_ERROR: i32 = -1;
/// Invalid operation.
pub const CODE_INVALID_OP: i32 = 1;
/// The connection is not usable for the requested operation.
pub const CODE_WRONG_CONN: i32 = 100;
/// The connection was closed.
pub const CODE_CONN_CLOSED: i32 = 102;
/// An outbound call did not get a reply in time.
pub const CODE_CALL_TIMEOUT: i32 = 103;
/// Writing to the connection failed.
pub const CODE_WRITE_FAILED: i32 = 104;
/// Dialing (or upgrading) the connection failed.
pub const CODE_DIAL_FAILED: i32 = 105;
/// The message could not be decoded or was not expected.
pub const CODE_BAD_MESSAGE: i32 = 400;
/// The caller is not authenticated.
pub const CODE_UNAUTHORIZED: i32 = 401;
/// The caller is authenticated but not allowed.
pub const CODE_FORBIDDEN: i32 = 403;
/// No handler for the route.
pub const CODE_NOT_FOUND: i32 = 404;
/// The message type is not allowed here.
pub const CODE_MTYPE_NOT_ALLOWED: i32 = 405;
/// The handler ran out of time.
pub const CODE_HANDLE_TIMEOUT: i32 = 408;
/// The handler failed.
pub const CODE_INTERNAL_SERVER_ERROR: i32 = 500;
/// A forwarding hop failed.
pub const CODE_BAD_GATEWAY: i32 = 502;

/// Standard text for a status code.
pub fn code_text(code: i32) -> &'static str {
    match code {
        CODE_INVALID_OP => "Invalid Operation",
        CODE_WRONG_CONN => "Wrong Connection",
        CODE_CONN_CLOSED => "Connection Closed",
        CODE_CALL_TIMEOUT => "Call Timeout",
        CODE_WRITE_FAILED => "Write Failed",
        CODE_DIAL_FAILED => "Dial Failed",
        CODE_BAD_MESSAGE => "Bad Message",
        CODE_UNAUTHORIZED => "Unauthorized",
        CODE_FORBIDDEN => "Forbidden",
        CODE_NOT_FOUND => "Not Found",
        CODE_MTYPE_NOT_ALLOWED => "Message Type Not Allowed",
        CODE_HANDLE_TIMEOUT => "Handle Timeout",
        CODE_INTERNAL_SERVER_ERROR => "Internal Server Error",
        CODE_BAD_GATEWAY => "Bad Gateway",
        _ => "Unknown Error",
    }
}

/// A structured RPC error: numeric code, short message, free-form detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rerror {
    /// Status code.
    pub code: i32,
    /// Short, stable message.
    pub message: String,
    /// Free-form detail (often the underlying cause).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl Rerror {
    /// Create a new error.
    pub fn new(code: i32, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Create an error whose message is the standard text for `code`.
    pub fn from_code(code: i32, detail: impl Into<String>) -> Self {
        Self::new(code, code_text(code), detail)
    }

    /// Whether the code is in the internal `[100, 200)` range.
    pub fn is_internal(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Replace an internal-range code with the gateway code and its text.
    ///
    /// The detail is kept. Any other code is returned unchanged.
    pub fn into_gateway(mut self) -> Self {
        if self.is_internal() {
            self.code = CODE_BAD_GATEWAY;
            self.message = code_text(CODE_BAD_GATEWAY).to_string();
        }
        self
    }
}

impl fmt::Display for Rerror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.code, self.message, self.detail)
        }
    }
}

impl std::error::Error for Rerror {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_range() {
        assert!(Rerror::from_code(CODE_WRONG_CONN, "").is_internal());
        assert!(Rerror::new(199, "x", "").is_internal());
        assert!(!Rerror::new(99, "x", "").is_internal());
        assert!(!Rerror::new(200, "x", "").is_internal());
        assert!(!Rerror::from_code(CODE_NOT_FOUND, "").is_internal());
    }

    #[test]
    fn test_into_gateway_remaps_internal_codes() {
        let err = Rerror::new(150, "backend hiccup", "conn reset").into_gateway();
        assert_eq!(err.code, CODE_BAD_GATEWAY);
        assert_eq!(err.message, "Bad Gateway");
        assert_eq!(err.detail, "conn reset");
    }

    #[test]
    fn test_into_gateway_passes_other_codes() {
        let err = Rerror::new(404, "Not Found", "/nope").into_gateway();
        assert_eq!(err, Rerror::new(404, "Not Found", "/nope"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Rerror::new(403, "auth fail", "").to_string(), "[403] auth fail");
        assert_eq!(
            Rerror::new(10005, "incorrect author", "alice").to_string(),
            "[10005] incorrect author: alice"
        );
    }

    #[test]
    fn test_serde_skips_empty_detail() {
        let json = serde_json::to_string(&Rerror::new(1, "a", "")).unwrap();
        assert!(!json.contains("detail"));
        let back: Rerror = serde_json::from_str(&json).unwrap();
        assert_eq!(back.detail, "");
    }
}
