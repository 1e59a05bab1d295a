//! keyward: an OAuth 2.0 and OpenID Connect authorization server.
//!
//! Login and consent are delegated to external apps through challenge and
//! verifier handshakes; keyward issues and tracks the resulting grants, tokens
//! and sessions, and answers access control questions through its policy
//! decision point.

pub mod api;
pub mod clients;
pub mod config;
pub mod entity;
pub mod error;
pub mod janitor;
pub mod oauth2;
pub mod pages;
pub mod state;
pub mod trust;
pub mod warden;

pub use state::AppState;
