//! Fragment-to-query bridging for provider callbacks.
//!
//! Legacy provider callbacks deliver tokens in the URL fragment, which never
//! reaches a server. The bridge copies those parameters into the query string
//! and drops the fragment so the classifier can see them.
//!
//! Flow Overview:
//! - No fragment, or no provider parameter in it: nothing happens.
//! - Otherwise fragment pairs are merged into the query (existing query keys
//!   win), the fragment is cleared and a one-time marker is appended.
//! - A URL that already carries the marker is never bridged again, so a
//!   reloaded callback page cannot loop.
//!
//! The caller applies the result with a history replace, never a push.

use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashSet;
use url::{form_urlencoded, Url};

/// Query parameter tagging a URL that has already been bridged.
pub const BRIDGE_MARKER: &str = "bridged";

/// Fragment parameters that identify a provider callback.
pub const PROVIDER_FRAGMENT_PARAMS: [&str; 4] =
    ["access_token", "refresh_token", "type", "expires_in"];

const MARKER_LEN: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The URL needs no rewrite.
    Unchanged,
    /// Replace the visible URL with this one.
    Replace(Url),
}

impl BridgeOutcome {
    /// The URL the rest of the pass should read.
    #[must_use]
    pub fn effective<'a>(&'a self, original: &'a Url) -> &'a Url {
        match self {
            Self::Unchanged => original,
            Self::Replace(url) => url,
        }
    }
}

/// Inspect `url` and bridge provider fragment parameters into its query.
#[must_use]
pub fn bridge(url: &Url) -> BridgeOutcome {
    let Some(fragment) = url.fragment().filter(|fragment| !fragment.is_empty()) else {
        return BridgeOutcome::Unchanged;
    };

    if url.query_pairs().any(|(key, _)| key == BRIDGE_MARKER) {
        return BridgeOutcome::Unchanged;
    }

    let fragment_pairs: Vec<(String, String)> = form_urlencoded::parse(fragment.as_bytes())
        .into_owned()
        .collect();

    if !fragment_pairs
        .iter()
        .any(|(key, _)| PROVIDER_FRAGMENT_PARAMS.contains(&key.as_str()))
    {
        return BridgeOutcome::Unchanged;
    }

    let existing: HashSet<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();

    let mut bridged = url.clone();
    bridged.set_fragment(None);
    {
        let mut query = bridged.query_pairs_mut();
        for (key, value) in fragment_pairs
            .iter()
            .filter(|(key, _)| !existing.contains(key))
        {
            query.append_pair(key, value);
        }
        query.append_pair(BRIDGE_MARKER, &marker_nonce());
    }

    BridgeOutcome::Replace(bridged)
}

fn marker_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MARKER_LEN)
        .map(char::from)
        .collect()
}
