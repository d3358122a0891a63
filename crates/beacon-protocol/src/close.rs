//! Close codes sent when the server ends a connection.

use std::fmt;

/// WebSocket close codes used by Beacon.
///
/// Codes in the 4000 range are application specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (used for explicit logout).
    Normal = 1000,
    /// Server shutting down or session ended.
    GoingAway = 1001,
    /// Unexpected server failure during the handshake.
    Internal = 4000,
    /// A newer connection for the same identity replaced this one.
    Superseded = 4001,
    /// The liveness sweep demoted the user.
    Inactive = 4002,
    /// Bad token or token subject does not match the identity.
    AuthFailed = 4003,
    /// No user record exists for the identity.
    UnknownUser = 4004,
}

impl CloseCode {
    /// Default human-readable reason for this code.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            CloseCode::Normal => "closed",
            CloseCode::GoingAway => "going away",
            CloseCode::Internal => "internal error",
            CloseCode::Superseded => "superseded by a newer connection",
            CloseCode::Inactive => "inactive",
            CloseCode::AuthFailed => "authentication failed",
            CloseCode::UnknownUser => "user not found",
        }
    }

    /// Numeric code.
    #[must_use]
    pub fn code(&self) -> u16 {
        *self as u16
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        code as u16
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}

/// A close request: code plus reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseReason {
    /// Close with the code's default reason.
    #[must_use]
    pub fn new(code: CloseCode) -> Self {
        Self {
            code,
            reason: code.reason().to_string(),
        }
    }

    /// Close with a custom reason.
    #[must_use]
    pub fn with_reason(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl From<CloseCode> for CloseReason {
    fn from(code: CloseCode) -> Self {
        Self::new(code)
    }
}
