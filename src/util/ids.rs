//! Shared identifier and ranking types.

use serde::{Deserialize, Serialize};

/// Administrator-chosen resource identifier.
pub type ResourceId = String;
/// Reservation request identifier (assigned by the repository).
pub type RequestId = u64;
/// Reservation identifier (assigned by the repository).
pub type ReservationId = u64;
/// Executable identifier (assigned by the repository).
pub type ExecutableId = u64;
/// User identifier as known to the authorization layer.
pub type UserId = String;

/// Resource priority used when ranking scheduling candidates.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Used only when nothing better is free.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Preferred.
    High,
    /// Always tried first.
    Critical,
}

/// Communication technology supported by rooms, aliases and terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    /// ITU-T H.323.
    H323,
    /// Session Initiation Protocol.
    Sip,
    /// Browser based WebRTC.
    WebRtc,
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H323 => write!(f, "h323"),
            Self::Sip => write!(f, "sip"),
            Self::WebRtc => write!(f, "web_rtc"),
        }
    }
}

/// Kind of alias produced by an alias capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasType {
    /// Numeric E.164 dial-in number.
    E164,
    /// SIP/H.323 URI.
    Uri,
    /// Human readable room name.
    RoomName,
}
