//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run, which today is always
//! the API server with its provider and session configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{provider, session, ARG_PORT};
use crate::cli::globals::GlobalArgs;
use anyhow::{Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let provider_opts = provider::Options::parse(matches)?;
    Url::parse(&provider_opts.url).context("invalid SPENDLINE_PROVIDER_URL")?;

    let session_opts = session::Options::parse(matches);
    if let Some(redirect) = &session_opts.reset_redirect {
        Url::parse(redirect).context("invalid SPENDLINE_PASSWORD_RESET_REDIRECT")?;
    }

    Ok(Action::Server(Args {
        port,
        globals: GlobalArgs::new(provider_opts.url, provider_opts.anon_key),
        request_timeout_seconds: provider_opts.request_timeout_seconds,
        reset_redirect: session_opts.reset_redirect,
        visit_ttl_seconds: session_opts.visit_ttl_seconds,
    }))
}
