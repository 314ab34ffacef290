//! In-memory session for one visit.
//!
//! A session is created by a login, a signup that returns a live session, or
//! a completed recovery exchange. It is never persisted: it lives inside the
//! visitor's router and is dropped on logout or invalidation.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Shortest identifier that can still be a UUID (simple form, no hyphens).
pub const MIN_USER_ID_LEN: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Established by the provider with a refreshable token pair.
    Full,
    /// Built from a bare access token; good for one immediate action only.
    Degraded,
}

/// Result of the user id sanity check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdentityCheck {
    Plausible,
    Missing,
    TooShort,
    Malformed,
}

/// Check that `user_id` looks like a provider-issued UUID.
#[must_use]
pub fn check_user_id(user_id: &str) -> IdentityCheck {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        IdentityCheck::Missing
    } else if user_id.len() < MIN_USER_ID_LEN {
        IdentityCheck::TooShort
    } else if Uuid::try_parse(user_id).is_err() {
        IdentityCheck::Malformed
    } else {
        IdentityCheck::Plausible
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub theme_preference: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub kind: SessionKind,
}

impl Session {
    #[must_use]
    pub fn new(user_id: String, email: String, access_token: SecretString) -> Self {
        let display_name = display_name_from_email(&email);
        Self {
            user_id,
            email,
            display_name,
            theme_preference: None,
            access_token,
            refresh_token: None,
            kind: SessionKind::Full,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        if let Some(name) = display_name.filter(|name| !name.trim().is_empty()) {
            self.display_name = name.trim().to_string();
        }
        self
    }

    #[must_use]
    pub fn with_theme_preference(mut self, theme: Option<String>) -> Self {
        self.theme_preference = theme;
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<SecretString>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    #[must_use]
    pub fn degraded(mut self) -> Self {
        self.kind = SessionKind::Degraded;
        self
    }

    #[must_use]
    pub fn identity(&self) -> IdentityCheck {
        check_user_id(&self.user_id)
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        Profile {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            theme_preference: self.theme_preference.clone(),
            kind: self.kind,
        }
    }
}

fn display_name_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|local| !local.is_empty())
        .unwrap_or("there")
        .to_string()
}

/// Non-sensitive session data handed to the client.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub theme_preference: Option<String>,
    pub kind: SessionKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_ID: &str = "0b6f3c1e-8a3c-4a51-9f77-0d8a1f0e5c21";

    #[test]
    fn check_user_id_rejects_short_and_malformed() {
        assert_eq!(check_user_id(USER_ID), IdentityCheck::Plausible);
        assert_eq!(
            check_user_id("0b6f3c1e8a3c4a519f770d8a1f0e5c21"),
            IdentityCheck::Plausible
        );
        assert_eq!(check_user_id(""), IdentityCheck::Missing);
        assert_eq!(check_user_id("   "), IdentityCheck::Missing);
        assert_eq!(check_user_id("abc"), IdentityCheck::TooShort);
        assert_eq!(
            check_user_id("this-is-long-enough-but-not-a-uuid!!"),
            IdentityCheck::Malformed
        );
    }

    #[test]
    fn display_name_defaults_to_email_local_part() {
        let session = Session::new(
            USER_ID.to_string(),
            "ana@example.com".to_string(),
            SecretString::from("T".to_string()),
        );
        assert_eq!(session.display_name, "ana");

        let session = session.with_display_name(Some("  Ana Lima ".to_string()));
        assert_eq!(session.display_name, "Ana Lima");

        let session = session.with_display_name(Some(String::new()));
        assert_eq!(session.display_name, "Ana Lima");
    }

    #[test]
    fn profile_omits_tokens() -> Result<(), serde_json::Error> {
        let session = Session::new(
            USER_ID.to_string(),
            "ana@example.com".to_string(),
            SecretString::from("secret-bearer".to_string()),
        )
        .degraded();
        let value = serde_json::to_value(session.profile())?;
        assert_eq!(value["kind"], "degraded");
        assert!(!value.to_string().contains("secret-bearer"));
        Ok(())
    }
}
