//! Validated names that double as path components.
//!
//! Stores only accept parsed names, so a traversal attempt fails before any
//! file operation. `coerce` is the separate, explicit mapping from free text
//! for input layers that want a best-effort name instead of an error.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::{CLIENT_ID_LENGTH, DEFAULT_ROOM, MAX_NAME_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("identity {0:?} contains characters outside [A-Za-z0-9._-] or starts/ends with a dot")]
    UnsafeIdentity(String),
    #[error("identity {0:?} contains no alphanumeric characters")]
    EmptyIdentity(String),
    #[error("name {0:?} exceeds {MAX_NAME_LENGTH} characters")]
    TooLong(String),
    #[error("room name {0:?} is not lowercase [a-z0-9_-] with alphanumeric edges")]
    InvalidRoom(String),
}

fn is_identity_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')
}

fn is_room_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '_' | '-')
}

/// Identity of one participant; also the presence filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresenceId(String);

impl PresenceId {
    /// Accepts exactly the safe charset, rejecting everything else.
    ///
    /// A valid identity is 1..=64 chars of `[A-Za-z0-9._-]`, contains at
    /// least one alphanumeric and has no leading or trailing dot or space.
    /// By construction it is a single path component.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        if raw.is_empty() || !raw.chars().any(|ch| ch.is_ascii_alphanumeric()) {
            return Err(NameError::EmptyIdentity(raw.to_string()));
        }
        if !raw.chars().all(is_identity_char) {
            return Err(NameError::UnsafeIdentity(raw.to_string()));
        }
        if raw.starts_with('.') || raw.ends_with('.') {
            return Err(NameError::UnsafeIdentity(raw.to_string()));
        }
        if raw.chars().count() > MAX_NAME_LENGTH {
            return Err(NameError::TooLong(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Best-effort mapping from free text: runs of unsafe characters become
    /// a single underscore, edge dots and spaces are trimmed, anything left
    /// without an alphanumeric falls back to `Anonymous`, capped at 64.
    pub fn coerce(raw: &str) -> Self {
        let mut cleaned = String::with_capacity(raw.len());
        let mut in_run = false;
        for ch in raw.chars() {
            if is_identity_char(ch) {
                cleaned.push(ch);
                in_run = false;
            } else if !in_run {
                cleaned.push('_');
                in_run = true;
            }
        }
        let mut cleaned: String = cleaned
            .trim_matches(|ch| ch == ' ' || ch == '.')
            .chars()
            .take(MAX_NAME_LENGTH)
            .collect();
        // Truncation can expose a trailing dot again.
        cleaned = cleaned.trim_end_matches('.').to_string();
        if !cleaned.chars().any(|ch| ch.is_ascii_alphanumeric()) {
            cleaned = "Anonymous".to_string();
        }
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PresenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PresenceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Room name; doubles as the room's directory name under the shared tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(String);

impl RoomName {
    /// Accepts 1..=64 chars of `[a-z0-9_-]` with no `-`/`_` at the edges.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        if raw.is_empty()
            || !raw.chars().all(is_room_char)
            || raw.starts_with(['-', '_'])
            || raw.ends_with(['-', '_'])
        {
            return Err(NameError::InvalidRoom(raw.to_string()));
        }
        if raw.chars().count() > MAX_NAME_LENGTH {
            return Err(NameError::TooLong(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Lowercases and squeezes runs of invalid characters to a single dash,
    /// trims dash/underscore edges and falls back to the default room.
    pub fn coerce(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        let mut cleaned = String::with_capacity(lowered.len());
        let mut in_run = false;
        for ch in lowered.chars() {
            if is_room_char(ch) {
                cleaned.push(ch);
                in_run = false;
            } else if !in_run {
                cleaned.push('-');
                in_run = true;
            }
        }
        let cleaned: String = cleaned
            .trim_matches(|ch| ch == '-' || ch == '_')
            .chars()
            .take(MAX_NAME_LENGTH)
            .collect();
        let cleaned = cleaned.trim_end_matches(['-', '_']).to_string();
        if cleaned.is_empty() {
            return Self::default();
        }
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomName {
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Short stable id distinguishing client processes in lock ownership and
/// presence metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(hex[..CLIENT_ID_LENGTH].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_safe_identities() {
        for ok in ["alice", "Alice.Bob", "a", "user_42", "x-y.z", "A1"] {
            assert!(PresenceId::parse(ok).is_ok(), "{ok:?} should parse");
        }
    }

    #[test]
    fn parse_rejects_traversal_shapes() {
        for bad in [
            "../etc/passwd",
            "..",
            ".",
            "a/b",
            "a\\b",
            ".hidden",
            "dot.",
            "",
            "___",
            "with space",
            "emoji\u{1f600}",
        ] {
            assert!(PresenceId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn parse_rejects_overlong_identity() {
        let long = "a".repeat(MAX_NAME_LENGTH + 1);
        assert_eq!(PresenceId::parse(&long), Err(NameError::TooLong(long.clone())));
    }

    #[test]
    fn coerce_always_yields_parseable_identity() {
        for raw in [
            "../etc/passwd",
            "Ada Lovelace!",
            "",
            "   ",
            "....",
            &"x".repeat(300),
            "dots...everywhere...",
        ] {
            let coerced = PresenceId::coerce(raw);
            assert!(
                PresenceId::parse(coerced.as_str()).is_ok(),
                "coerce({raw:?}) produced unparseable {:?}",
                coerced.as_str()
            );
        }
        assert_eq!(PresenceId::coerce("Ada Lovelace").as_str(), "Ada_Lovelace");
        assert_eq!(PresenceId::coerce("!!!").as_str(), "Anonymous");
    }

    #[test]
    fn room_parse_is_strict_lowercase() {
        assert!(RoomName::parse("general").is_ok());
        assert!(RoomName::parse("build-logs_2").is_ok());
        assert!(RoomName::parse("General").is_err());
        assert!(RoomName::parse("-edge").is_err());
        assert!(RoomName::parse("edge_").is_err());
        assert!(RoomName::parse("a b").is_err());
        assert!(RoomName::parse("").is_err());
    }

    #[test]
    fn room_coerce_squeezes_and_falls_back() {
        assert_eq!(RoomName::coerce("Builds And Breaks").as_str(), "builds-and-breaks");
        assert_eq!(RoomName::coerce("///").as_str(), "general");
        assert_eq!(RoomName::coerce("").as_str(), "general");
        assert_eq!(RoomName::coerce("--mid--").as_str(), "mid");
    }

    #[test]
    fn client_ids_are_short_hex() {
        let id = ClientId::generate();
        assert_eq!(id.as_str().len(), CLIENT_ID_LENGTH);
        assert!(id.as_str().chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(ClientId::generate(), ClientId::generate());
    }
}
