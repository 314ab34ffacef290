//! # Spendline (authentication session and recovery-flow controller)
//!
//! Spendline's budget, expense and asset screens are plain CRUD forms over a
//! remote record store. This crate owns the part that decides who is looking
//! at them: it gates every screen behind an explicit login and completes
//! password-recovery and email-confirmation round trips.
//!
//! ## Render pass
//!
//! Every interaction is one full pass, in this order:
//!
//! 1. **Fragment bridge** (`auth::bridge`): provider parameters delivered in
//!    the URL fragment are moved into the query string.
//! 2. **Recovery classifier** (`auth::recovery`): the query string is matched
//!    against the three recovery protocols, first match wins.
//! 3. **Exchange client** (`auth::exchange`): a matched artifact is traded for
//!    a session, with bounded retry and request-shape fallbacks.
//! 4. **Session router** (`auth::router`): installs the session, strips the
//!    consumed parameters and decides which screen to render.
//!
//! Sessions live in memory for the duration of a visit; nothing is restored
//! across visits.

pub mod api;
pub mod auth;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
