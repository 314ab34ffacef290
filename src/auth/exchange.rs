//! Turns recovery artifacts into sessions.
//!
//! Every provider call runs under the [`RetryPolicy`]. Where deployments
//! disagree on the request shape, the candidates are tried in order and the
//! first success wins; if all fail, the last error is returned.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use super::claims::read_claim;
use super::error::AuthError;
use super::provider::{AuthResponse, CodeExchange, IdentityProvider, VerifyRequest};
use super::recovery::{OtpType, RecoveryRequest};
use super::retry::RetryPolicy;
use super::session::Session;

#[derive(Clone, Debug)]
pub struct ExchangeClient<P> {
    provider: P,
    retry: RetryPolicy,
}

impl<P: IdentityProvider> ExchangeClient<P> {
    #[must_use]
    pub fn new(provider: P, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Dispatch on the classified request.
    ///
    /// # Errors
    /// Returns the provider error of the last attempted call, or
    /// `MissingSession` for [`RecoveryRequest::None`].
    pub async fn exchange(
        &self,
        request: &RecoveryRequest,
        code_verifier: Option<&SecretString>,
    ) -> Result<Session, AuthError> {
        match request {
            RecoveryRequest::VerificationToken { token, otp_type } => {
                self.exchange_verification_token(token, *otp_type).await
            }
            RecoveryRequest::AuthorizationCode { code, .. } => {
                self.exchange_authorization_code(code, code_verifier).await
            }
            RecoveryRequest::FragmentTokenPair {
                access_token,
                refresh_token,
                ..
            } => {
                self.accept_fragment_token_pair(access_token, refresh_token.as_ref())
                    .await
            }
            RecoveryRequest::None => Err(AuthError::MissingSession),
        }
    }

    /// Verify a one-time token; `token_hash` and legacy `token` shapes are equivalent.
    ///
    /// # Errors
    /// Returns the last provider error when both shapes fail.
    #[instrument(skip_all, fields(otp_type = otp_type.as_str()))]
    pub async fn exchange_verification_token(
        &self,
        token: &SecretString,
        otp_type: OtpType,
    ) -> Result<Session, AuthError> {
        let candidates = [
            VerifyRequest::TokenHash {
                token_hash: token.clone(),
                otp_type,
            },
            VerifyRequest::Token {
                token: token.clone(),
                otp_type,
            },
        ];

        let mut last_error = AuthError::MissingSession;
        for candidate in &candidates {
            match self
                .retry
                .run("verify_otp", || self.provider.verify_otp(candidate))
                .await
                .and_then(AuthResponse::into_session)
            {
                Ok(session) => {
                    info!("Verification token exchanged");
                    return Ok(session);
                }
                Err(err) => {
                    debug!("Verification shape failed: {err}");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Exchange an authorization code. The bare shape goes first and is
    /// repeated verbatim once on any failure; the wrapped shape carries the
    /// visit's PKCE verifier when one exists.
    ///
    /// # Errors
    /// Returns the last provider error when both shapes fail.
    #[instrument(skip_all)]
    pub async fn exchange_authorization_code(
        &self,
        code: &SecretString,
        code_verifier: Option<&SecretString>,
    ) -> Result<Session, AuthError> {
        let candidates = [
            CodeExchange::Bare {
                auth_code: code.clone(),
            },
            CodeExchange::Wrapped {
                auth_code: code.clone(),
                code_verifier: code_verifier
                    .cloned()
                    .unwrap_or_else(|| SecretString::from(String::new())),
            },
        ];

        let mut last_error = AuthError::MissingSession;
        for candidate in &candidates {
            let call = || self.provider.exchange_code_for_session(candidate);
            let result = match candidate {
                CodeExchange::Bare { .. } => {
                    self.retry
                        .run_repeating("exchange_code_for_session", call)
                        .await
                }
                CodeExchange::Wrapped { .. } => {
                    self.retry.run("exchange_code_for_session", call).await
                }
            };
            match result.and_then(AuthResponse::into_session) {
                Ok(session) => {
                    info!(shape = candidate.shape(), "Authorization code exchanged");
                    return Ok(session);
                }
                Err(err) => {
                    debug!(shape = candidate.shape(), "Code exchange failed: {err}");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Accept tokens bridged out of the URL fragment.
    ///
    /// With a refresh token the pair must establish a real session: the
    /// access token is checked first, and if the provider refuses it the
    /// refresh token is exchanged for a fresh grant. A bare access token
    /// yields a degraded session whose identity comes from unverified claims;
    /// it is only good for the immediate password update.
    ///
    /// # Errors
    /// Returns the last provider error when neither token is accepted.
    #[instrument(skip_all, fields(has_refresh = refresh_token.is_some()))]
    pub async fn accept_fragment_token_pair(
        &self,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
    ) -> Result<Session, AuthError> {
        let Some(refresh_token) = refresh_token else {
            let bearer = access_token.expose_secret();
            let user_id = read_claim(bearer, "sub").unwrap_or_default();
            let email = read_claim(bearer, "email").unwrap_or_default();
            warn!("Fragment delivered no refresh token; using a degraded session");
            return Ok(Session::new(user_id, email, access_token.clone()).degraded());
        };

        match self
            .retry
            .run("get_user", || self.provider.get_user(access_token))
            .await
        {
            Ok(user) => {
                info!("Fragment token pair accepted");
                return Ok(user.into_session(access_token.clone(), Some(refresh_token.clone())));
            }
            Err(err) => debug!("Access token refused, trying the refresh token: {err}"),
        }

        let session = self
            .retry
            .run("refresh_session", || {
                self.provider.refresh_session(refresh_token)
            })
            .await
            .and_then(AuthResponse::into_session)?;
        info!("Fragment token pair refreshed");
        Ok(session)
    }
}
