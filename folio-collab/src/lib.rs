//! # folio-collab: Real-time template collaboration client
//!
//! Keeps one WebSocket session per template alive for a financial
//! dashboard editor. It tracks who is present and relays remote element
//! edits and cursor moves to the host.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐     JSON frames      ┌─────────────────┐
//! │ CollaborationSession │ ◄──────────────────► │ collab server   │
//! │ (per template)       │   /ws/collaboration  │                 │
//! └──────────┬───────────┘                      └─────────────────┘
//!            │ SessionEvent
//!            ▼
//! ┌──────────────────────┐
//! │ host UI              │  roster, element updates, status banner
//! └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Wire envelope and typed payloads (JSON)
//! - [`roster`]: Collaborator roster reducer
//! - [`backoff`]: Reconnect policy (1s, 2s, 4s, 8s, 16s)
//! - [`config`]: Session configuration and `FOLIO_*` env loading
//! - [`token`]: Auth token stores
//! - [`session`]: Connection lifecycle, heartbeat, dispatch
//!
//! Delivery is at-most-once: frames sent while the socket is not open are
//! dropped and reported as `false`, never queued.

pub mod backoff;
pub mod config;
pub mod error;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod token;

// Re-exports for convenience
pub use backoff::{Backoff, ReconnectPolicy};
pub use config::SessionConfig;
pub use error::{CollabError, ConfigError, ProtocolError, TokenError};
pub use protocol::{
    CollaborationMessage, CursorPosition, EditType, Payload, Permission, PresenceAction,
    TemplateEdit, UserPresence,
};
pub use roster::{Collaborator, Roster};
pub use session::{
    CollaborationSession, ConnectionStatus, SessionEvent, TemplateInstruction, Visibility,
};
pub use token::{FileToken, StaticToken, TokenStore};
