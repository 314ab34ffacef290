use clap::{Arg, ArgMatches, Command};

pub const ARG_RESET_REDIRECT: &str = "reset-redirect";
pub const ARG_VISIT_TTL_SECONDS: &str = "visit-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RESET_REDIRECT)
                .long(ARG_RESET_REDIRECT)
                .help("App URL that password reset links return to")
                .long_help(
                    "App URL that password reset links return to. Without it, the forgot password screen reports that resets are unavailable.",
                )
                .env("SPENDLINE_PASSWORD_RESET_REDIRECT"),
        )
        .arg(
            Arg::new(ARG_VISIT_TTL_SECONDS)
                .long(ARG_VISIT_TTL_SECONDS)
                .help("Idle time after which a visit and its session are dropped")
                .env("SPENDLINE_VISIT_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub reset_redirect: Option<String>,
    pub visit_ttl_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            reset_redirect: matches
                .get_one::<String>(ARG_RESET_REDIRECT)
                .map(|redirect| redirect.trim().to_string())
                .filter(|redirect| !redirect.is_empty()),
            visit_ttl_seconds: matches
                .get_one::<u64>(ARG_VISIT_TTL_SECONDS)
                .copied()
                .unwrap_or(3600),
        }
    }
}
