use crate::{
    api::{self, visitors::Visitors, AppState},
    auth::{GoTrueClient, RetryPolicy, RouterConfig},
    cli::globals::GlobalArgs,
    store::PostgrestStore,
};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub globals: GlobalArgs,
    pub request_timeout_seconds: u64,
    pub reset_redirect: Option<String>,
    pub visit_ttl_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the HTTP clients cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("args: {:?}", args);

    let timeout = Duration::from_secs(args.request_timeout_seconds);

    let provider = GoTrueClient::new(
        &args.globals.provider_url,
        args.globals.anon_key.clone(),
        timeout,
    )
    .context("Failed to build identity provider client")?;

    let store = PostgrestStore::new(
        &args.globals.provider_url,
        args.globals.anon_key.clone(),
        timeout,
    )
    .context("Failed to build record store client")?;

    if args.reset_redirect.is_none() {
        info!("No password reset redirect configured; reset emails are disabled");
    }

    let visitors = Visitors::new(
        provider,
        RetryPolicy::default(),
        RouterConfig::new().with_reset_redirect(args.reset_redirect.clone()),
        Duration::from_secs(args.visit_ttl_seconds),
    );

    let state =
        AppState::new(visitors, store).with_app_url(args.reset_redirect.as_deref())?;

    api::new(args.port, state).await
}
