//! Avatar session management
//!
//! `SessionOrchestrator` acquires a credential, resolves relays, negotiates
//! the transport with the synthesis service and keeps it healthy for the
//! lifetime of a `connect()` call.

pub mod config;
pub mod credential;
pub mod orchestrator;
pub mod service;
mod supervisor;

pub use config::AvatarConfig;
pub use credential::{Credential, CredentialProvider, HttpCredentialProvider};
pub use orchestrator::{Collaborators, SessionOrchestrator, SessionSettings, SessionState};
pub use service::{AvatarService, HttpAvatarService};
