//! Identity provider seam and its GoTrue-compatible HTTP client.
//!
//! The router and exchange client only see [`IdentityProvider`]; tests swap
//! in an in-memory fake. Request-shape alternatives (`VerifyRequest`,
//! `CodeExchange`) are explicit values so callers can try them in order
//! instead of guessing which one a deployment accepts.

use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

use super::error::AuthError;
use super::recovery::OtpType;
use super::session::Session;
use crate::APP_USER_AGENT;

/// User record as returned by the provider.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl ProviderUser {
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        ["name", "full_name"]
            .iter()
            .find_map(|key| self.user_metadata.get(*key).and_then(Value::as_str))
            .map(ToString::to_string)
    }

    #[must_use]
    pub fn theme(&self) -> Option<String> {
        self.user_metadata
            .get("theme")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }

    /// Build a full session around this user and the given bearer token.
    #[must_use]
    pub fn into_session(
        self,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> Session {
        let display_name = self.display_name();
        let theme = self.theme();
        Session::new(self.id, self.email.unwrap_or_default(), access_token)
            .with_display_name(display_name)
            .with_theme_preference(theme)
            .with_refresh_token(refresh_token)
    }
}

/// Tokens of an established provider session.
#[derive(Clone, Debug)]
pub struct ProviderSession {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_in: Option<u64>,
}

/// Outcome of a call that may establish a session.
#[derive(Clone, Debug, Default)]
pub struct AuthResponse {
    pub user: Option<ProviderUser>,
    pub session: Option<ProviderSession>,
}

impl AuthResponse {
    /// Combine user and tokens into a [`Session`].
    ///
    /// # Errors
    /// Returns `MissingSession` when either half is absent.
    pub fn into_session(self) -> Result<Session, AuthError> {
        match (self.user, self.session) {
            (Some(user), Some(session)) => {
                Ok(user.into_session(session.access_token, session.refresh_token))
            }
            _ => Err(AuthError::MissingSession),
        }
    }
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    user: Option<ProviderUser>,
}

impl From<TokenGrant> for AuthResponse {
    fn from(grant: TokenGrant) -> Self {
        Self {
            user: grant.user,
            session: Some(ProviderSession {
                access_token: SecretString::from(grant.access_token),
                refresh_token: grant
                    .refresh_token
                    .filter(|token| !token.is_empty())
                    .map(SecretString::from),
                expires_in: grant.expires_in,
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

#[derive(Clone, Debug)]
pub struct SignUpRequest {
    pub email: String,
    pub password: SecretString,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct PasswordReset {
    pub email: String,
    pub redirect_to: String,
    /// PKCE challenge (method `plain`) for the code the link will carry.
    pub code_challenge: Option<SecretString>,
}

/// Request shapes accepted by one-time-token verification.
#[derive(Clone, Debug)]
pub enum VerifyRequest {
    TokenHash {
        token_hash: SecretString,
        otp_type: OtpType,
    },
    Token {
        token: SecretString,
        otp_type: OtpType,
    },
}

/// Request shapes accepted by the code exchange endpoint.
#[derive(Clone, Debug)]
pub enum CodeExchange {
    Bare {
        auth_code: SecretString,
    },
    Wrapped {
        auth_code: SecretString,
        code_verifier: SecretString,
    },
}

impl CodeExchange {
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Bare { .. } => "bare",
            Self::Wrapped { .. } => "wrapped",
        }
    }
}

#[derive(Clone, Debug)]
pub enum UserUpdate {
    Password(SecretString),
    Metadata(Map<String, Value>),
}

/// Operations the controller consumes from the identity provider.
pub trait IdentityProvider: Send + Sync {
    fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthResponse, AuthError>> + Send;

    /// Session is `None` when the deployment requires email confirmation.
    fn sign_up(
        &self,
        request: &SignUpRequest,
    ) -> impl Future<Output = Result<AuthResponse, AuthError>> + Send;

    fn sign_out(
        &self,
        access_token: &SecretString,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn reset_password_for_email(
        &self,
        request: &PasswordReset,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn update_user(
        &self,
        access_token: &SecretString,
        update: &UserUpdate,
    ) -> impl Future<Output = Result<ProviderUser, AuthError>> + Send;

    fn verify_otp(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<AuthResponse, AuthError>> + Send;

    fn exchange_code_for_session(
        &self,
        request: &CodeExchange,
    ) -> impl Future<Output = Result<AuthResponse, AuthError>> + Send;

    /// Resolve the user behind an access token (raw token acceptance).
    fn get_user(
        &self,
        access_token: &SecretString,
    ) -> impl Future<Output = Result<ProviderUser, AuthError>> + Send;

    /// Trade a refresh token for a new session.
    fn refresh_session(
        &self,
        refresh_token: &SecretString,
    ) -> impl Future<Output = Result<AuthResponse, AuthError>> + Send;
}

/// HTTP client for a GoTrue-compatible auth server (`{provider_url}/auth/v1`).
#[derive(Clone)]
pub struct GoTrueClient {
    base_url: String,
    anon_key: SecretString,
    http: Client,
}

impl std::fmt::Debug for GoTrueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoTrueClient")
            .field("base_url", &self.base_url)
            .field("anon_key", &"***")
            .finish_non_exhaustive()
    }
}

impl GoTrueClient {
    /// # Errors
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(
        provider_url: &str,
        anon_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            base_url: format!("{}/auth/v1", provider_url.trim_end_matches('/')),
            anon_key,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", self.anon_key.expose_secret())
    }

    fn authorized(&self, builder: RequestBuilder, access_token: &SecretString) -> RequestBuilder {
        self.request(builder).bearer_auth(access_token.expose_secret())
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, AuthError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = provider_message(status, &body);
        debug!(status = status.as_u16(), "Provider rejected request: {message}");
        Err(AuthError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, AuthError> {
        let response = Self::send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| AuthError::Decode(err.to_string()))
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<AuthResponse, AuthError> {
        let builder = self
            .request(self.http.post(self.endpoint("/token")))
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let grant: TokenGrant = Self::send_json(builder).await?;
        Ok(grant.into())
    }
}

impl IdentityProvider for GoTrueClient {
    #[instrument(skip_all)]
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, AuthError> {
        self.token_grant(
            "password",
            json!({
                "email": credentials.email,
                "password": credentials.password.expose_secret(),
            }),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, AuthError> {
        let builder = self.request(self.http.post(self.endpoint("/signup"))).json(&json!({
            "email": request.email,
            "password": request.password.expose_secret(),
            "data": { "name": request.name },
        }));

        // With email confirmation enabled the provider answers with a bare
        // user object instead of a token grant.
        let body: Value = Self::send_json(builder).await?;
        if body.get("access_token").is_some() {
            let grant: TokenGrant =
                serde_json::from_value(body).map_err(|err| AuthError::Decode(err.to_string()))?;
            Ok(grant.into())
        } else {
            let user: ProviderUser =
                serde_json::from_value(body).map_err(|err| AuthError::Decode(err.to_string()))?;
            Ok(AuthResponse {
                user: Some(user),
                session: None,
            })
        }
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: &SecretString) -> Result<(), AuthError> {
        let builder = self.authorized(self.http.post(self.endpoint("/logout")), access_token);
        Self::send(builder).await.map(|_| ())
    }

    #[instrument(skip_all)]
    async fn reset_password_for_email(&self, request: &PasswordReset) -> Result<(), AuthError> {
        let mut body = json!({ "email": request.email });
        if let Some(challenge) = &request.code_challenge {
            body["code_challenge"] = Value::from(challenge.expose_secret());
            body["code_challenge_method"] = Value::from("plain");
        }

        let builder = self
            .request(self.http.post(self.endpoint("/recover")))
            .query(&[("redirect_to", request.redirect_to.as_str())])
            .json(&body);
        Self::send(builder).await.map(|_| ())
    }

    #[instrument(skip_all)]
    async fn update_user(
        &self,
        access_token: &SecretString,
        update: &UserUpdate,
    ) -> Result<ProviderUser, AuthError> {
        let body = match update {
            UserUpdate::Password(password) => json!({ "password": password.expose_secret() }),
            UserUpdate::Metadata(data) => json!({ "data": data }),
        };
        let builder = self
            .authorized(self.http.put(self.endpoint("/user")), access_token)
            .json(&body);
        Self::send_json(builder).await
    }

    #[instrument(skip_all)]
    async fn verify_otp(&self, request: &VerifyRequest) -> Result<AuthResponse, AuthError> {
        let body = match request {
            VerifyRequest::TokenHash {
                token_hash,
                otp_type,
            } => json!({ "type": otp_type.as_str(), "token_hash": token_hash.expose_secret() }),
            VerifyRequest::Token { token, otp_type } => {
                json!({ "type": otp_type.as_str(), "token": token.expose_secret() })
            }
        };
        let builder = self
            .request(self.http.post(self.endpoint("/verify")))
            .json(&body);
        let grant: TokenGrant = Self::send_json(builder).await?;
        Ok(grant.into())
    }

    #[instrument(skip_all, fields(shape = request.shape()))]
    async fn exchange_code_for_session(
        &self,
        request: &CodeExchange,
    ) -> Result<AuthResponse, AuthError> {
        let body = match request {
            CodeExchange::Bare { auth_code } => json!({ "auth_code": auth_code.expose_secret() }),
            CodeExchange::Wrapped {
                auth_code,
                code_verifier,
            } => json!({
                "auth_code": auth_code.expose_secret(),
                "code_verifier": code_verifier.expose_secret(),
            }),
        };
        self.token_grant("pkce", body).await
    }

    #[instrument(skip_all)]
    async fn get_user(&self, access_token: &SecretString) -> Result<ProviderUser, AuthError> {
        let builder = self.authorized(self.http.get(self.endpoint("/user")), access_token);
        Self::send_json(builder).await
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<AuthResponse, AuthError> {
        self.token_grant(
            "refresh_token",
            json!({ "refresh_token": refresh_token.expose_secret() }),
        )
        .await
    }
}

/// Pull a human-readable reason out of a provider error body.
fn provider_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_ID: &str = "0b6f3c1e-8a3c-4a51-9f77-0d8a1f0e5c21";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn client(server: &MockServer) -> GoTrueClient {
        GoTrueClient::new(
            &server.uri(),
            SecretString::from("anon-key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn user_json() -> Value {
        json!({
            "id": USER_ID,
            "email": "ana@example.com",
            "user_metadata": { "name": "Ana", "theme": "dark" }
        })
    }

    #[test]
    fn provider_message_prefers_known_fields() {
        assert_eq!(
            provider_message(StatusCode::BAD_REQUEST, r#"{"msg":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(
            provider_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#
            ),
            "Email not confirmed"
        );
        assert_eq!(
            provider_message(StatusCode::BAD_GATEWAY, "<html>"),
            "Bad Gateway"
        );
    }

    #[tokio::test]
    async fn sign_in_returns_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({ "email": "ana@example.com", "password": "hunter22" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "AT",
                "refresh_token": "RT",
                "expires_in": 3600,
                "user": user_json()
            })))
            .mount(&server)
            .await;

        let response = client(&server)
            .sign_in_with_password(&Credentials {
                email: "ana@example.com".to_string(),
                password: SecretString::from("hunter22".to_string()),
            })
            .await?;
        let session = response.into_session()?;

        assert_eq!(session.user_id, USER_ID);
        assert_eq!(session.display_name, "Ana");
        assert_eq!(session.theme_preference.as_deref(), Some("dark"));
        assert_eq!(session.access_token.expose_secret(), "AT");
        assert!(session.refresh_token.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn sign_up_without_confirmation_has_no_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .mount(&server)
            .await;

        let response = client(&server)
            .sign_up(&SignUpRequest {
                email: "ana@example.com".to_string(),
                password: SecretString::from("hunter22".to_string()),
                name: "Ana".to_string(),
            })
            .await?;

        assert!(response.session.is_none());
        assert_eq!(response.user.map(|user| user.id).as_deref(), Some(USER_ID));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_credentials_surface_provider_message() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .sign_in_with_password(&Credentials {
                email: "ana@example.com".to_string(),
                password: SecretString::from("wrong".to_string()),
            })
            .await;

        let Err(err) = result else {
            anyhow::bail!("expected rejection");
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Invalid login credentials");
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_sends_redirect_and_challenge() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/recover"))
            .and(query_param("redirect_to", "https://app.spendline.dev/"))
            .and(body_json(json!({
                "email": "ana@example.com",
                "code_challenge": "verifier",
                "code_challenge_method": "plain"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .reset_password_for_email(&PasswordReset {
                email: "ana@example.com".to_string(),
                redirect_to: "https://app.spendline.dev/".to_string(),
                code_challenge: Some(SecretString::from("verifier".to_string())),
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn update_password_uses_bearer_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer T"))
            .and(body_json(json!({ "password": "new-password" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .expect(1)
            .mount(&server)
            .await;

        let user = client(&server)
            .update_user(
                &SecretString::from("T".to_string()),
                &UserUpdate::Password(SecretString::from("new-password".to_string())),
            )
            .await?;
        assert_eq!(user.id, USER_ID);
        Ok(())
    }
}
