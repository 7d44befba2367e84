//! Identity token grant pipeline.
//!
//! Accepts a third-party issued identity token, verifies it against the
//! resolved provider configuration, and exchanges it for a first-party
//! session, creating or linking the local account inside one atomic unit of
//! work.

mod error;
mod http;
mod linker;
mod service;


pub use error::{GrantError, GrantResult};
pub use http::{ApiError, AppState, OAuthErrorBody, router};
pub use linker::{LinkOutcome, LinkPolicy, link_or_create};
pub use service::{GrantOutcome, GrantService, IdTokenGrantParams};

// Re-export common types for convenience
pub use rts_identity_core::{GrantMethod, VerifiedIdentity};
