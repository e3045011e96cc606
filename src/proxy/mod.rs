//! The request admission pipeline and the surrounding HTTP plumbing.
//!
//! Stage order per request: security filter → resource matcher →
//! authentication (with refresh coordination) → admission → header injection
//! inside the upstream forwarder.

pub mod admission;
pub mod auth;
pub mod forward;
pub mod headers;
pub mod identity;
pub mod matcher;
pub mod oauth;
pub mod router;
pub mod security;
pub mod server;

pub use router::{AppState, create_router};
pub use server::Proxy;
