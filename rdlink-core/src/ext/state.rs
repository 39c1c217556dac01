//! Handshake states exchanged between the two halves of an extension.

use std::fmt;

/// Wire payload: `[state: i32][serialization hash: i64]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtState {
    /// Sent on activation and after the link comes back.
    Ready,
    /// Reply to `Ready`.
    ReceivedCounterpart,
    /// Sent when the extension's scope terminates.
    Disconnected,
}

impl ExtState {
    pub const fn code(self) -> i32 {
        match self {
            ExtState::Ready => 0,
            ExtState::ReceivedCounterpart => 1,
            ExtState::Disconnected => 2,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExtState::Ready),
            1 => Some(ExtState::ReceivedCounterpart),
            2 => Some(ExtState::Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for ExtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtState::Ready => "Ready",
            ExtState::ReceivedCounterpart => "ReceivedCounterpart",
            ExtState::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}
