use secrecy::SecretString;

/// Identity provider coordinates shared by the auth client and the record store.
#[derive(Clone)]
pub struct GlobalArgs {
    pub provider_url: String,
    pub anon_key: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(provider_url: String, anon_key: SecretString) -> Self {
        Self {
            provider_url: provider_url.trim_end_matches('/').to_string(),
            anon_key,
        }
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("provider_url", &self.provider_url)
            .field("anon_key", &"***")
            .finish()
    }
}
