//! Session state: encrypted cookies and refresh-token persistence.

pub mod codec;
pub mod cookies;
pub mod store;

pub use codec::CookieCodec;
pub use store::{RefreshTokenStore, fingerprint};
