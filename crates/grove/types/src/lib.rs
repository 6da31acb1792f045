//! Shared record families and the codec every Grove store speaks.
//!
//! Everything that crosses the shared filesystem is defined here:
//! - **Record families**: room events, presence snapshots, memory entries,
//!   action ledger rows.
//! - **Codec**: one strict decode gate (trim, JSON object, schema version,
//!   exact field types, closed enums) applied per family; unknown fields are
//!   preserved opaquely so newer writers never break older readers.
//! - **Safe names**: validated room names and presence identities that are
//!   guaranteed to be single path components, plus short client ids.
//!
//! Readers are strict and skip what they cannot validate; writers are
//! additive and only ever gain fields. Stores accept parsed names only, so a
//! path-unsafe identity is rejected before any file is touched.

#![deny(unsafe_code)]

pub mod action;
pub mod codec;
pub mod event;
pub mod memory;
pub mod names;
pub mod presence;
pub mod stamp;

pub use action::{
    ActionDecision, ActionRequest, ActionRow, ActionStatus, DecisionRow, RiskLevel, StatusRow,
};
pub use codec::{
    decode_action, decode_event, decode_memory, decode_presence, encode_action, encode_event,
    encode_memory, encode_presence, SCHEMA_VERSION,
};
pub use event::{Event, EventKind};
pub use memory::{Confidence, MemoryEntry, MemoryScope};
pub use names::{ClientId, NameError, PresenceId, RoomName};
pub use presence::PresenceSnapshot;

/// Maximum number of events kept when loading room history.
pub const MAX_MESSAGES: usize = 200;

/// Room every client lands in when no other room is configured.
pub const DEFAULT_ROOM: &str = "general";

/// Local-only room used for private AI conversations.
pub const AI_DM_ROOM: &str = "ai-dm";

/// Upper bound on room names and presence identities, in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// Length of generated client ids, in hex characters.
pub const CLIENT_ID_LENGTH: usize = 12;
