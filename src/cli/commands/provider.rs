use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PROVIDER_URL: &str = "provider-url";
pub const ARG_ANON_KEY: &str = "anon-key";
pub const ARG_REQUEST_TIMEOUT_SECONDS: &str = "request-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PROVIDER_URL)
                .long(ARG_PROVIDER_URL)
                .help("Identity provider base URL, example: https://<project>.supabase.co")
                .env("SPENDLINE_PROVIDER_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ANON_KEY)
                .long(ARG_ANON_KEY)
                .help("Public (anon) API key sent with every provider request")
                .env("SPENDLINE_ANON_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT_SECONDS)
                .long(ARG_REQUEST_TIMEOUT_SECONDS)
                .help("Timeout for each provider and record store request")
                .env("SPENDLINE_REQUEST_TIMEOUT_SECONDS")
                .default_value("20")
                .value_parser(clap::value_parser!(u64).range(1..=300)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub anon_key: SecretString,
    pub request_timeout_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_PROVIDER_URL)
            .cloned()
            .context("missing required argument: --provider-url")?;
        let anon_key = matches
            .get_one::<String>(ARG_ANON_KEY)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --anon-key")?;
        let request_timeout_seconds = matches
            .get_one::<u64>(ARG_REQUEST_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(20);

        Ok(Self {
            url,
            anon_key,
            request_timeout_seconds,
        })
    }
}
