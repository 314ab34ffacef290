//! Classification of recovery and confirmation artifacts in the query string.
//!
//! Three incompatible conventions reach the app, checked in this order:
//! 1. One-time verification token: `token` (or `token_hash`) with a known `type`.
//! 2. Authorization code (PKCE-style): `code`.
//! 3. Bridged fragment tokens: `access_token` with optional `refresh_token`.
//!
//! Server-issued single-use artifacts are consumed before the fragment path,
//! which carries no server-side revocation once it sits in a URL.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;
use utoipa::ToSchema;

use super::bridge::BRIDGE_MARKER;

/// Query parameters consumed by a recovery exchange.
pub const RECOVERY_PARAMS: [&str; 9] = [
    "token",
    "token_hash",
    "type",
    "code",
    "access_token",
    "refresh_token",
    "expires_in",
    "expires_at",
    "token_type",
];

/// Verification purposes a provider link can carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Recovery,
    Invite,
    Signup,
    #[serde(rename = "magiclink")]
    MagicLink,
}

impl OtpType {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recovery" => Some(Self::Recovery),
            "invite" => Some(Self::Invite),
            "signup" => Some(Self::Signup),
            "magiclink" => Some(Self::MagicLink),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Invite => "invite",
            Self::Signup => "signup",
            Self::MagicLink => "magiclink",
        }
    }

    /// Whether completing this link ends with the user choosing a password.
    #[must_use]
    pub fn sets_password(self) -> bool {
        matches!(self, Self::Recovery | Self::Invite)
    }
}

/// Discriminant of a [`RecoveryRequest`], for logs and assertions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecoveryKind {
    VerificationToken,
    AuthorizationCode,
    FragmentTokenPair,
    None,
}

/// Recovery artifact found in the current URL. Recomputed every pass.
#[derive(Debug)]
pub enum RecoveryRequest {
    VerificationToken {
        token: SecretString,
        otp_type: OtpType,
    },
    AuthorizationCode {
        code: SecretString,
        otp_type: OtpType,
    },
    FragmentTokenPair {
        access_token: SecretString,
        refresh_token: Option<SecretString>,
        otp_type: OtpType,
    },
    None,
}

impl RecoveryRequest {
    #[must_use]
    pub fn kind(&self) -> RecoveryKind {
        match self {
            Self::VerificationToken { .. } => RecoveryKind::VerificationToken,
            Self::AuthorizationCode { .. } => RecoveryKind::AuthorizationCode,
            Self::FragmentTokenPair { .. } => RecoveryKind::FragmentTokenPair,
            Self::None => RecoveryKind::None,
        }
    }

    /// Purpose of the link; `None` for an empty request.
    #[must_use]
    pub fn otp_type(&self) -> Option<OtpType> {
        match self {
            Self::VerificationToken { otp_type, .. }
            | Self::AuthorizationCode { otp_type, .. }
            | Self::FragmentTokenPair { otp_type, .. } => Some(*otp_type),
            Self::None => None,
        }
    }
}

/// Decide which recovery protocol, if any, the query string carries.
#[must_use]
pub fn classify(url: &Url) -> RecoveryRequest {
    let mut params: HashMap<String, String> = HashMap::new();
    for (key, value) in url.query_pairs() {
        let value = value.trim();
        if !value.is_empty() {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.to_string());
        }
    }

    let declared_type = params.get("type").map(|value| OtpType::parse(value));

    let token = params.get("token_hash").or_else(|| params.get("token"));
    if let (Some(token), Some(Some(otp_type))) = (token, declared_type) {
        return RecoveryRequest::VerificationToken {
            token: SecretString::from(token.clone()),
            otp_type,
        };
    }

    // Code and fragment links default to recovery: reset emails are the only
    // links this app requests without an explicit type.
    let otp_type = declared_type.flatten().unwrap_or(OtpType::Recovery);

    if let Some(code) = params.get("code") {
        return RecoveryRequest::AuthorizationCode {
            code: SecretString::from(code.clone()),
            otp_type,
        };
    }

    if let Some(access_token) = params.get("access_token") {
        return RecoveryRequest::FragmentTokenPair {
            access_token: SecretString::from(access_token.clone()),
            refresh_token: params
                .get("refresh_token")
                .map(|token| SecretString::from(token.clone())),
            otp_type,
        };
    }

    RecoveryRequest::None
}

/// Remove consumed recovery parameters and the bridge marker from `url`.
#[must_use]
pub fn strip_recovery_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            key != BRIDGE_MARKER && !RECOVERY_PARAMS.iter().any(|param| key == param)
        })
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn classify_str(raw: &str) -> RecoveryRequest {
        classify(&Url::parse(raw).unwrap())
    }

    #[test]
    fn verification_token_with_recovery_type() {
        let request = classify_str("https://app.spendline.dev/?type=recovery&token=abc123");
        let RecoveryRequest::VerificationToken { token, otp_type } = request else {
            panic!("expected verification token");
        };
        assert_eq!(token.expose_secret(), "abc123");
        assert_eq!(otp_type, OtpType::Recovery);
    }

    #[test]
    fn token_hash_is_accepted_for_confirmation_types() {
        for (raw_type, expected) in [
            ("signup", OtpType::Signup),
            ("invite", OtpType::Invite),
            ("magiclink", OtpType::MagicLink),
        ] {
            let request = classify_str(&format!(
                "https://app.spendline.dev/?token_hash=h1&type={raw_type}"
            ));
            assert_eq!(request.kind(), RecoveryKind::VerificationToken);
            assert_eq!(request.otp_type(), Some(expected));
        }
    }

    #[test]
    fn verification_token_wins_over_code_and_access_token() {
        let request = classify_str(
            "https://app.spendline.dev/?access_token=AT&code=XYZ&token=abc&type=recovery",
        );
        assert_eq!(request.kind(), RecoveryKind::VerificationToken);
    }

    #[test]
    fn token_without_known_type_falls_through() {
        let request = classify_str("https://app.spendline.dev/?token=abc&code=XYZ");
        assert_eq!(request.kind(), RecoveryKind::AuthorizationCode);

        let request = classify_str("https://app.spendline.dev/?token=abc&type=bogus");
        assert_eq!(request.kind(), RecoveryKind::None);
    }

    #[test]
    fn code_wins_over_access_token() {
        let request = classify_str("https://app.spendline.dev/?code=XYZ&access_token=AT");
        let RecoveryRequest::AuthorizationCode { code, otp_type } = request else {
            panic!("expected authorization code");
        };
        assert_eq!(code.expose_secret(), "XYZ");
        assert_eq!(otp_type, OtpType::Recovery);
    }

    #[test]
    fn bridged_access_token_with_optional_refresh() {
        let request =
            classify_str("https://app.spendline.dev/?access_token=AT&refresh_token=RT&bridged=x");
        let RecoveryRequest::FragmentTokenPair {
            access_token,
            refresh_token,
            ..
        } = request
        else {
            panic!("expected fragment token pair");
        };
        assert_eq!(access_token.expose_secret(), "AT");
        assert_eq!(
            refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("RT".to_string())
        );

        let request = classify_str("https://app.spendline.dev/?access_token=AT&type=signup");
        assert_eq!(request.kind(), RecoveryKind::FragmentTokenPair);
        assert_eq!(request.otp_type(), Some(OtpType::Signup));
    }

    #[test]
    fn nothing_to_classify() {
        for raw in [
            "https://app.spendline.dev/",
            "https://app.spendline.dev/?auth=login",
            "https://app.spendline.dev/?code=",
            "https://app.spendline.dev/?type=recovery",
        ] {
            assert_eq!(classify_str(raw).kind(), RecoveryKind::None, "{raw}");
        }
    }

    #[test]
    fn strip_keeps_unrelated_params() {
        let url = Url::parse(
            "https://app.spendline.dev/?auth=login&code=XYZ&type=recovery&bridged=n&access_token=AT",
        )
        .unwrap();
        let stripped = strip_recovery_params(&url);
        assert_eq!(stripped.as_str(), "https://app.spendline.dev/?auth=login");

        let url = Url::parse("https://app.spendline.dev/?token=abc&type=recovery").unwrap();
        assert_eq!(
            strip_recovery_params(&url).as_str(),
            "https://app.spendline.dev/"
        );
    }
}
