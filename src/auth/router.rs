//! Session router: the visit's auth state machine.
//!
//! Flow Overview (one render pass):
//! 1. Bridge fragment parameters into the query string.
//! 2. Classify the query string; on a match, exchange the artifact and strip
//!    it from the URL. This runs before any other gating so a recovery link
//!    pre-empts whatever screen the visitor was on.
//! 3. Apply the `auth` screen parameter for anonymous visitors.
//! 4. Drop an authenticated session whose user id fails the sanity check.
//! 5. Apply the submitted user action, then re-check the identity.
//! 6. Report the mode, a notice and the URL to replace, if it changed.
//!
//! Security boundaries: the recovery screen is only reachable through a
//! successful exchange, and a recovery session never becomes the ongoing app
//! session; after the password update it is terminated and the visitor must
//! log in. This router is the only owner of the session.

use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::bridge::bridge;
use super::error::AuthError;
use super::exchange::ExchangeClient;
use super::provider::{
    AuthResponse, Credentials, IdentityProvider, PasswordReset, SignUpRequest, UserUpdate,
};
use super::recovery::{classify, strip_recovery_params, OtpType};
use super::retry::RetryPolicy;
use super::session::{IdentityCheck, Session};
use super::types::{AuthMode, AuthScreen, Notice, UserAction, View};

pub const AUTH_PARAM: &str = "auth";
pub const MIN_PASSWORD_LEN: usize = 6;
const PKCE_VERIFIER_LEN: usize = 64;

#[derive(Clone, Debug, Default)]
pub struct RouterConfig {
    reset_redirect: Option<String>,
}

impl RouterConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reset_redirect(mut self, redirect: Option<String>) -> Self {
        self.reset_redirect = redirect
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    #[must_use]
    pub fn reset_redirect(&self) -> Option<&str> {
        self.reset_redirect.as_deref()
    }
}

#[derive(Debug)]
enum RouterState {
    Anonymous(AuthScreen),
    Recovering(Session),
    Authenticated(Session),
}

pub struct SessionRouter<P> {
    state: RouterState,
    exchange: ExchangeClient<P>,
    config: RouterConfig,
    pkce_verifier: Option<SecretString>,
}

impl<P> std::fmt::Debug for SessionRouter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: IdentityProvider> SessionRouter<P> {
    #[must_use]
    pub fn new(provider: P, retry: RetryPolicy, config: RouterConfig) -> Self {
        Self {
            state: RouterState::Anonymous(AuthScreen::Landing),
            exchange: ExchangeClient::new(provider, retry),
            config,
            pkce_verifier: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match &self.state {
            RouterState::Anonymous(screen) => (*screen).into(),
            RouterState::Recovering(_) => AuthMode::RecoveryPasswordEntry,
            RouterState::Authenticated(_) => AuthMode::Authenticated,
        }
    }

    /// The current session, in recovery or authenticated mode.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            RouterState::Anonymous(_) => None,
            RouterState::Recovering(session) | RouterState::Authenticated(session) => {
                Some(session)
            }
        }
    }

    /// The app session, only when authenticated with a plausible user id.
    /// Record store access must go through this.
    #[must_use]
    pub fn app_session(&self) -> Option<&Session> {
        match &self.state {
            RouterState::Authenticated(session)
                if session.identity() == IdentityCheck::Plausible =>
            {
                Some(session)
            }
            _ => None,
        }
    }

    /// Run one full render pass for the browser `url` and optional `action`.
    #[instrument(skip_all, fields(mode_before = ?self.mode()))]
    pub async fn render(&mut self, url: &Url, action: Option<UserAction>) -> View {
        let mut notice = None;

        let bridged = bridge(url);
        let mut current = bridged.effective(url).clone();

        let request = classify(&current);
        if let Some(otp_type) = request.otp_type() {
            debug!(kind = ?request.kind(), "Recovery artifact found");
            match self
                .exchange
                .exchange(&request, self.pkce_verifier.as_ref())
                .await
            {
                Ok(session) => {
                    current = strip_recovery_params(&current);
                    notice = Some(self.complete_link(session, otp_type).await);
                }
                Err(err) => {
                    warn!(kind = ?request.kind(), "Recovery exchange failed: {err}");
                    if !err.is_retryable() {
                        current = strip_recovery_params(&current);
                    }
                    notice = Some(link_failure(&err));
                }
            }
        }

        if let RouterState::Anonymous(screen) = &mut self.state {
            if let Some(requested) = requested_screen(&current) {
                *screen = requested;
            }
        }

        if let Some(invalid) = self.enforce_identity() {
            notice = Some(invalid);
        }

        if let Some(action) = action {
            if let Some(result) = self.apply(action).await {
                notice = Some(result);
            }
            if let Some(invalid) = self.enforce_identity() {
                notice = Some(invalid);
            }
        }

        let location = self.sync_location(current);
        View {
            mode: self.mode(),
            notice,
            profile: self.session().map(Session::profile),
            location: location
                .filter(|location| location != url)
                .map(String::from),
        }
    }

    async fn complete_link(&mut self, session: Session, otp_type: OtpType) -> Notice {
        self.pkce_verifier = None;

        let from = self.mode();
        let displaced = std::mem::replace(
            &mut self.state,
            RouterState::Anonymous(AuthScreen::Landing),
        );
        if let RouterState::Authenticated(previous) = displaced {
            info!("Link replaces the signed-in session");
            self.sign_out_quietly(&previous.access_token).await;
        }

        if otp_type.sets_password() {
            info!(?from, otp_type = otp_type.as_str(), "Entering password recovery");
            self.state = RouterState::Recovering(session);
            return Notice::info("Choose a new password.");
        }

        // Confirmation links still end at the login screen.
        self.sign_out_quietly(&session.access_token).await;
        info!(otp_type = otp_type.as_str(), "Email confirmed");
        self.state = RouterState::Anonymous(AuthScreen::Login);
        Notice::success("Email confirmed. Log in to continue.")
    }

    fn enforce_identity(&mut self) -> Option<Notice> {
        let RouterState::Authenticated(session) = &self.state else {
            return None;
        };
        let check = session.identity();
        if check == IdentityCheck::Plausible {
            return None;
        }

        warn!(?check, "Discarding session with implausible user id");
        self.state = RouterState::Anonymous(AuthScreen::Landing);
        Some(Notice::error(
            "Your session could not be verified. Please log in again.",
        ))
    }

    async fn apply(&mut self, action: UserAction) -> Option<Notice> {
        let mode = self.mode();
        debug!(action = action.name(), ?mode, "Applying action");

        match action {
            UserAction::Navigate { to } => self.navigate(to),
            UserAction::Login { email, password } if mode == AuthMode::Login => {
                Some(self.login(email, password).await)
            }
            UserAction::Signup {
                name,
                email,
                password,
                confirm,
            } if mode == AuthMode::Signup => Some(self.signup(name, email, password, confirm).await),
            UserAction::RequestPasswordReset { email } if mode == AuthMode::ForgotPassword => {
                Some(self.request_password_reset(email).await)
            }
            UserAction::UpdatePassword { password, confirm }
                if mode == AuthMode::RecoveryPasswordEntry =>
            {
                Some(self.update_password(password, confirm).await)
            }
            UserAction::Logout if mode == AuthMode::Authenticated => Some(self.logout().await),
            UserAction::SetTheme { theme } if mode == AuthMode::Authenticated => {
                Some(self.set_theme(theme).await)
            }
            other => {
                debug!(action = other.name(), ?mode, "Ignoring action not valid in this mode");
                None
            }
        }
    }

    fn navigate(&mut self, to: AuthScreen) -> Option<Notice> {
        match self.state {
            RouterState::Anonymous(_) => {
                self.state = RouterState::Anonymous(to);
            }
            RouterState::Recovering(_) => {
                info!(?to, "Recovery abandoned");
                self.state = RouterState::Anonymous(to);
            }
            RouterState::Authenticated(_) => {
                debug!(?to, "Ignoring navigation while authenticated");
            }
        }
        None
    }

    async fn login(&mut self, email: String, password: SecretString) -> Notice {
        let email = email.trim().to_string();
        if email.is_empty() || password.expose_secret().is_empty() {
            return Notice::error("Enter your email and password.");
        }

        let credentials = Credentials { email, password };
        let provider = self.exchange.provider();
        let result = self
            .exchange
            .retry()
            .run("sign_in_with_password", || {
                provider.sign_in_with_password(&credentials)
            })
            .await
            .and_then(AuthResponse::into_session);

        match result {
            Ok(session) => {
                info!("Logged in");
                self.state = RouterState::Authenticated(session);
                Notice::success("Logged in.")
            }
            Err(err) => {
                warn!("Login failed: {err}");
                Notice::error(format!("Login failed: {err}"))
            }
        }
    }

    async fn signup(
        &mut self,
        name: String,
        email: String,
        password: SecretString,
        confirm: SecretString,
    ) -> Notice {
        let name = name.trim().to_string();
        let email = email.trim().to_string();
        if name.is_empty() {
            return Notice::error("Enter your name.");
        }
        if !valid_email(&email) {
            return Notice::error("Enter a valid email.");
        }
        if let Err(message) = check_new_password(&password, &confirm) {
            return Notice::error(message);
        }

        let request = SignUpRequest {
            email,
            password,
            name,
        };
        let provider = self.exchange.provider();
        let response = match self
            .exchange
            .retry()
            .run("sign_up", || provider.sign_up(&request))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("Signup failed: {err}");
                return Notice::error(format!("Signup failed: {err}"));
            }
        };

        if response.session.is_none() {
            info!("Account created; email confirmation pending");
            self.state = RouterState::Anonymous(AuthScreen::Login);
            return Notice::success("Account created. Check your email to confirm, then log in.");
        }

        match response.into_session() {
            Ok(session) => {
                info!("Account created with a live session");
                self.state = RouterState::Authenticated(session);
                Notice::success("Logged in.")
            }
            Err(_) => {
                self.state = RouterState::Anonymous(AuthScreen::Login);
                Notice::success("Account created. Please log in.")
            }
        }
    }

    async fn request_password_reset(&mut self, email: String) -> Notice {
        let email = email.trim().to_string();
        if email.is_empty() {
            return Notice::error("Enter your email.");
        }
        let Some(redirect_to) = self.config.reset_redirect().map(str::to_string) else {
            warn!("Password reset requested without a configured redirect");
            return Notice::error("Password reset is not available right now.");
        };

        let verifier = pkce_verifier();
        let request = PasswordReset {
            email,
            redirect_to,
            code_challenge: Some(verifier.clone()),
        };
        let provider = self.exchange.provider();
        match self
            .exchange
            .retry()
            .run("reset_password_for_email", || {
                provider.reset_password_for_email(&request)
            })
            .await
        {
            Ok(()) => {
                self.pkce_verifier = Some(verifier);
                Notice::success("Reset link sent. Check your email.")
            }
            Err(err) => {
                warn!("Password reset email failed: {err}");
                Notice::error(format!("Couldn't send reset email: {err}"))
            }
        }
    }

    async fn update_password(&mut self, password: SecretString, confirm: SecretString) -> Notice {
        if let Err(message) = check_new_password(&password, &confirm) {
            return Notice::error(message);
        }
        let RouterState::Recovering(session) = &self.state else {
            return Notice::error("Your reset link has expired. Request a new one.");
        };
        let access_token = session.access_token.clone();

        let update = UserUpdate::Password(password);
        let provider = self.exchange.provider();
        let result = self
            .exchange
            .retry()
            .run("update_user", || provider.update_user(&access_token, &update))
            .await;

        match result {
            Ok(_) => {
                self.sign_out_quietly(&access_token).await;
                info!("Password updated; recovery session terminated");
                self.state = RouterState::Anonymous(AuthScreen::Login);
                Notice::success("Password updated. Log in with your new password.")
            }
            Err(err) => {
                warn!("Password update failed: {err}");
                Notice::error(format!("Couldn't update password: {err}"))
            }
        }
    }

    async fn logout(&mut self) -> Notice {
        let previous = std::mem::replace(
            &mut self.state,
            RouterState::Anonymous(AuthScreen::Landing),
        );
        if let RouterState::Authenticated(session) = previous {
            self.sign_out_quietly(&session.access_token).await;
        }
        info!("Logged out");
        Notice::info("Logged out.")
    }

    async fn set_theme(&mut self, theme: String) -> Notice {
        let theme = theme.trim().to_string();
        if theme.is_empty() {
            return Notice::error("Choose a theme.");
        }
        let RouterState::Authenticated(session) = &self.state else {
            return Notice::error("Log in to save preferences.");
        };
        let access_token = session.access_token.clone();

        let mut data = Map::new();
        data.insert("theme".to_string(), Value::from(theme.clone()));
        let update = UserUpdate::Metadata(data);
        let provider = self.exchange.provider();
        let result = self
            .exchange
            .retry()
            .run("update_user", || provider.update_user(&access_token, &update))
            .await;

        match result {
            Ok(_) => {
                if let RouterState::Authenticated(session) = &mut self.state {
                    session.theme_preference = Some(theme);
                }
                Notice::success("Preferences saved.")
            }
            Err(err) => {
                warn!("Saving preferences failed: {err}");
                Notice::error(format!("Couldn't save preferences: {err}"))
            }
        }
    }

    /// Provider-side logout; local state is cleared regardless.
    async fn sign_out_quietly(&self, access_token: &SecretString) {
        if let Err(err) = self.exchange.provider().sign_out(access_token).await {
            debug!("Provider sign-out failed: {err}");
        }
    }

    /// Write the current screen into the `auth` parameter.
    fn sync_location(&self, mut url: Url) -> Option<Url> {
        let desired = match &self.state {
            RouterState::Anonymous(screen) => screen.as_param(),
            RouterState::Recovering(_) | RouterState::Authenticated(_) => None,
        };
        let current = url
            .query_pairs()
            .find(|(key, _)| key == AUTH_PARAM)
            .map(|(_, value)| value.into_owned());

        if current.as_deref() != desired {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| key != AUTH_PARAM)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            if kept.is_empty() && desired.is_none() {
                url.set_query(None);
            } else {
                let mut query = url.query_pairs_mut();
                query.clear().extend_pairs(kept);
                if let Some(desired) = desired {
                    query.append_pair(AUTH_PARAM, desired);
                }
            }
        }
        Some(url)
    }
}

fn requested_screen(url: &Url) -> Option<AuthScreen> {
    url.query_pairs()
        .find(|(key, _)| key == AUTH_PARAM)
        .and_then(|(_, value)| AuthScreen::from_param(&value))
}

fn link_failure(err: &AuthError) -> Notice {
    if err.is_retryable() {
        Notice::error(format!(
            "We couldn't complete your link right now ({err}). Reload the page to try again."
        ))
    } else {
        Notice::error("This link is invalid or has expired. Request a new one.")
    }
}

fn check_new_password(password: &SecretString, confirm: &SecretString) -> Result<(), String> {
    if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        ));
    }
    if password.expose_secret() != confirm.expose_secret() {
        return Err("Passwords do not match.".to_string());
    }
    Ok(())
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

fn pkce_verifier() -> SecretString {
    let verifier: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PKCE_VERIFIER_LEN)
        .map(char::from)
        .collect();
    SecretString::from(verifier)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::provider::{
        CodeExchange, ProviderSession, ProviderUser, VerifyRequest,
    };
    use crate::auth::session::SessionKind;
    use anyhow::Result;
    use base64ct::{Base64UrlUnpadded, Encoding};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const APP: &str = "https://app.spendline.dev/";
    const USER_ID: &str = "0b6f3c1e-8a3c-4a51-9f77-0d8a1f0e5c21";

    /// In-memory provider recording every call by operation name.
    #[derive(Clone)]
    struct FakeProvider {
        calls: Arc<Mutex<Vec<&'static str>>>,
        failures: Arc<Mutex<HashMap<&'static str, u16>>>,
        user_id: String,
        signup_session: bool,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                calls: Arc::default(),
                failures: Arc::default(),
                user_id: USER_ID.to_string(),
                signup_session: false,
            }
        }

        fn failing(self, operation: &'static str, status: u16) -> Self {
            self.failures.lock().unwrap().insert(operation, status);
            self
        }

        fn with_user_id(mut self, user_id: &str) -> Self {
            self.user_id = user_id.to_string();
            self
        }

        fn record(&self, operation: &'static str) -> Result<(), AuthError> {
            self.calls.lock().unwrap().push(operation);
            match self.failures.lock().unwrap().get(operation) {
                Some(status) => Err(AuthError::from_status(*status, format!("{operation} failed"))),
                None => Ok(()),
            }
        }

        fn calls(&self, operation: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| **call == operation)
                .count()
        }

        fn user(&self) -> ProviderUser {
            ProviderUser {
                id: self.user_id.clone(),
                email: Some("ana@example.com".to_string()),
                user_metadata: Map::new(),
            }
        }

        fn grant(&self) -> AuthResponse {
            AuthResponse {
                user: Some(self.user()),
                session: Some(ProviderSession {
                    access_token: SecretString::from("T".to_string()),
                    refresh_token: Some(SecretString::from("R".to_string())),
                    expires_in: Some(3600),
                }),
            }
        }
    }

    impl IdentityProvider for FakeProvider {
        async fn sign_in_with_password(
            &self,
            _credentials: &Credentials,
        ) -> Result<AuthResponse, AuthError> {
            self.record("sign_in_with_password")?;
            Ok(self.grant())
        }

        async fn sign_up(&self, _request: &SignUpRequest) -> Result<AuthResponse, AuthError> {
            self.record("sign_up")?;
            if self.signup_session {
                Ok(self.grant())
            } else {
                Ok(AuthResponse {
                    user: Some(self.user()),
                    session: None,
                })
            }
        }

        async fn sign_out(&self, _access_token: &SecretString) -> Result<(), AuthError> {
            self.record("sign_out")
        }

        async fn reset_password_for_email(&self, _request: &PasswordReset) -> Result<(), AuthError> {
            self.record("reset_password_for_email")
        }

        async fn update_user(
            &self,
            _access_token: &SecretString,
            _update: &UserUpdate,
        ) -> Result<ProviderUser, AuthError> {
            self.record("update_user")?;
            Ok(self.user())
        }

        async fn verify_otp(&self, _request: &VerifyRequest) -> Result<AuthResponse, AuthError> {
            self.record("verify_otp")?;
            Ok(self.grant())
        }

        async fn exchange_code_for_session(
            &self,
            _request: &CodeExchange,
        ) -> Result<AuthResponse, AuthError> {
            self.record("exchange_code_for_session")?;
            Ok(self.grant())
        }

        async fn get_user(&self, _access_token: &SecretString) -> Result<ProviderUser, AuthError> {
            self.record("get_user")?;
            Ok(self.user())
        }

        async fn refresh_session(
            &self,
            _refresh_token: &SecretString,
        ) -> Result<AuthResponse, AuthError> {
            self.record("refresh_session")?;
            Ok(self.grant())
        }
    }

    fn router(provider: &FakeProvider) -> SessionRouter<FakeProvider> {
        SessionRouter::new(
            provider.clone(),
            RetryPolicy::immediate(2),
            RouterConfig::new().with_reset_redirect(Some(APP.to_string())),
        )
    }

    fn url(value: &str) -> Url {
        Url::parse(value).unwrap()
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn update_password(password: &str, confirm: &str) -> UserAction {
        UserAction::UpdatePassword {
            password: secret(password),
            confirm: secret(confirm),
        }
    }

    fn login_action() -> UserAction {
        UserAction::Login {
            email: " ana@example.com ".to_string(),
            password: secret("hunter22"),
        }
    }

    #[tokio::test]
    async fn recovery_token_leads_to_password_entry_then_login() -> Result<()> {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(&url(&format!("{APP}?type=recovery&token=abc123")), None)
            .await;
        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert_eq!(view.location.as_deref(), Some(APP));
        let session = router.session().unwrap();
        assert_eq!(session.user_id, USER_ID);
        assert_eq!(session.access_token.expose_secret(), "T");
        assert!(router.app_session().is_none());

        let view = router
            .render(&url(APP), Some(update_password("new-password", "other-password")))
            .await;
        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert_eq!(
            view.notice,
            Some(Notice::error("Passwords do not match."))
        );
        assert_eq!(provider.calls("update_user"), 0);

        let view = router
            .render(&url(APP), Some(update_password("new-password", "new-password")))
            .await;
        assert_eq!(view.mode, AuthMode::Login);
        assert_eq!(
            view.notice,
            Some(Notice::success(
                "Password updated. Log in with your new password."
            ))
        );
        assert_eq!(view.location.as_deref(), Some(&*format!("{APP}?auth=login")));
        assert!(router.session().is_none());
        assert_eq!(provider.calls("update_user"), 1);
        assert_eq!(provider.calls("sign_out"), 1);
        assert_eq!(provider.calls("verify_otp"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn stripped_url_is_not_exchanged_twice() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(&url(&format!("{APP}?type=recovery&token_hash=abc123")), None)
            .await;
        let location = url(&view.location.unwrap());
        let view = router.render(&location, None).await;

        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert_eq!(view.location, None);
        assert_eq!(provider.calls("verify_otp"), 1);
    }

    #[tokio::test]
    async fn rejected_code_keeps_state_and_strips_link() {
        let provider = FakeProvider::new().failing("exchange_code_for_session", 400);
        let mut router = router(&provider);

        let view = router.render(&url(&format!("{APP}?code=XYZ")), None).await;

        assert_eq!(view.mode, AuthMode::Landing);
        assert!(router.session().is_none());
        assert_eq!(
            view.notice,
            Some(Notice::error(
                "This link is invalid or has expired. Request a new one."
            ))
        );
        assert_eq!(view.location.as_deref(), Some(APP));
        // Bare shape, its verbatim repeat, then wrapped.
        assert_eq!(provider.calls("exchange_code_for_session"), 3);
    }

    #[tokio::test]
    async fn transient_code_failure_keeps_url_for_reload() {
        let provider = FakeProvider::new().failing("exchange_code_for_session", 503);
        let mut router = router(&provider);

        let view = router.render(&url(&format!("{APP}?code=XYZ")), None).await;

        assert_eq!(view.mode, AuthMode::Landing);
        assert!(view.notice.as_ref().is_some_and(Notice::is_error));
        assert_eq!(view.location, None);
        assert_eq!(provider.calls("exchange_code_for_session"), 6);
    }

    #[tokio::test]
    async fn implausible_user_id_forces_landing() {
        let provider = FakeProvider::new().with_user_id("abc");
        let mut router = router(&provider);

        router.render(&url(&format!("{APP}?auth=login")), None).await;
        let view = router
            .render(&url(&format!("{APP}?auth=login")), Some(login_action()))
            .await;

        assert_eq!(view.mode, AuthMode::Landing);
        assert!(view.profile.is_none());
        assert!(router.app_session().is_none());
        assert!(view.notice.as_ref().is_some_and(Notice::is_error));
        assert_eq!(view.location.as_deref(), Some(APP));
    }

    #[tokio::test]
    async fn fragment_access_token_yields_degraded_recovery() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);
        let payload = Base64UrlUnpadded::encode_string(
            json!({ "sub": USER_ID, "email": "ana@example.com" })
                .to_string()
                .as_bytes(),
        );

        let view = router
            .render(
                &url(&format!("{APP}#access_token=h.{payload}.s&type=recovery")),
                None,
            )
            .await;

        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert_eq!(view.location.as_deref(), Some(APP));
        let profile = view.profile.unwrap();
        assert_eq!(profile.kind, SessionKind::Degraded);
        assert_eq!(profile.user_id, USER_ID);
        assert_eq!(provider.calls("get_user"), 0);

        // A degraded session is enough for the single password update.
        let view = router
            .render(&url(APP), Some(update_password("new-password", "new-password")))
            .await;
        assert_eq!(view.mode, AuthMode::Login);
    }

    #[tokio::test]
    async fn login_failure_stays_on_login() {
        let provider = FakeProvider::new().failing("sign_in_with_password", 400);
        let mut router = router(&provider);

        let view = router
            .render(&url(&format!("{APP}?auth=login")), Some(login_action()))
            .await;

        assert_eq!(view.mode, AuthMode::Login);
        assert_eq!(
            view.notice,
            Some(Notice::error("Login failed: sign_in_with_password failed"))
        );
        assert_eq!(view.location, None);
    }

    #[tokio::test]
    async fn login_success_clears_auth_param() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(&url(&format!("{APP}?auth=login")), Some(login_action()))
            .await;

        assert_eq!(view.mode, AuthMode::Authenticated);
        assert_eq!(view.notice, Some(Notice::success("Logged in.")));
        assert_eq!(view.location.as_deref(), Some(APP));
        assert_eq!(router.app_session().unwrap().user_id, USER_ID);

        let view = router.render(&url(APP), Some(UserAction::Logout)).await;
        assert_eq!(view.mode, AuthMode::Landing);
        assert_eq!(provider.calls("sign_out"), 1);
    }

    #[tokio::test]
    async fn empty_credentials_skip_provider() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(
                &url(&format!("{APP}?auth=login")),
                Some(UserAction::Login {
                    email: "  ".to_string(),
                    password: secret("hunter22"),
                }),
            )
            .await;

        assert_eq!(view.mode, AuthMode::Login);
        assert!(view.notice.as_ref().is_some_and(Notice::is_error));
        assert_eq!(provider.calls("sign_in_with_password"), 0);
    }

    #[tokio::test]
    async fn signup_without_session_asks_for_confirmation() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(
                &url(&format!("{APP}?auth=signup")),
                Some(UserAction::Signup {
                    name: "Ana".to_string(),
                    email: "ana@example.com".to_string(),
                    password: secret("hunter22"),
                    confirm: secret("hunter22"),
                }),
            )
            .await;

        assert_eq!(view.mode, AuthMode::Login);
        assert_eq!(
            view.notice,
            Some(Notice::success(
                "Account created. Check your email to confirm, then log in."
            ))
        );
        assert_eq!(view.location.as_deref(), Some(&*format!("{APP}?auth=login")));
    }

    #[tokio::test]
    async fn signup_validates_before_calling_provider() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);
        let target = url(&format!("{APP}?auth=signup"));

        let view = router
            .render(
                &target,
                Some(UserAction::Signup {
                    name: "Ana".to_string(),
                    email: "ana@example.com".to_string(),
                    password: secret("short"),
                    confirm: secret("short"),
                }),
            )
            .await;
        assert_eq!(
            view.notice,
            Some(Notice::error("Password must be at least 6 characters."))
        );

        let view = router
            .render(
                &target,
                Some(UserAction::Signup {
                    name: " ".to_string(),
                    email: "ana@example.com".to_string(),
                    password: secret("hunter22"),
                    confirm: secret("hunter22"),
                }),
            )
            .await;
        assert_eq!(view.notice, Some(Notice::error("Enter your name.")));
        assert_eq!(view.mode, AuthMode::Signup);
        assert_eq!(provider.calls("sign_up"), 0);
    }

    #[tokio::test]
    async fn password_reset_requires_redirect() {
        let provider = FakeProvider::new();
        let mut router = SessionRouter::new(
            provider.clone(),
            RetryPolicy::immediate(2),
            RouterConfig::new().with_reset_redirect(Some("  ".to_string())),
        );

        let view = router
            .render(
                &url(&format!("{APP}?auth=forgot")),
                Some(UserAction::RequestPasswordReset {
                    email: "ana@example.com".to_string(),
                }),
            )
            .await;

        assert_eq!(view.mode, AuthMode::ForgotPassword);
        assert!(view.notice.as_ref().is_some_and(Notice::is_error));
        assert_eq!(provider.calls("reset_password_for_email"), 0);
    }

    #[tokio::test]
    async fn password_reset_remembers_verifier_until_code_arrives() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(
                &url(&format!("{APP}?auth=forgot")),
                Some(UserAction::RequestPasswordReset {
                    email: "ana@example.com".to_string(),
                }),
            )
            .await;
        assert_eq!(view.mode, AuthMode::ForgotPassword);
        assert_eq!(
            view.notice,
            Some(Notice::success("Reset link sent. Check your email."))
        );
        let verifier = router.pkce_verifier.as_ref().unwrap();
        assert_eq!(verifier.expose_secret().len(), PKCE_VERIFIER_LEN);

        let view = router.render(&url(&format!("{APP}?code=XYZ")), None).await;
        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert!(router.pkce_verifier.is_none());
    }

    #[tokio::test]
    async fn recovery_link_preempts_login_screen() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        router.render(&url(&format!("{APP}?auth=login")), None).await;
        assert_eq!(router.mode(), AuthMode::Login);

        let view = router
            .render(
                &url(&format!("{APP}?auth=login&type=recovery&token=abc123")),
                Some(login_action()),
            )
            .await;

        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert_eq!(view.location.as_deref(), Some(APP));
        // Login is no longer valid once recovery took over.
        assert_eq!(provider.calls("sign_in_with_password"), 0);
    }

    #[tokio::test]
    async fn signup_confirmation_goes_to_login() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router
            .render(&url(&format!("{APP}?type=signup&token_hash=abc123")), None)
            .await;

        assert_eq!(view.mode, AuthMode::Login);
        assert_eq!(
            view.notice,
            Some(Notice::success("Email confirmed. Log in to continue."))
        );
        assert_eq!(view.location.as_deref(), Some(&*format!("{APP}?auth=login")));
        assert!(router.session().is_none());
        assert_eq!(provider.calls("sign_out"), 1);
    }

    #[tokio::test]
    async fn navigation_abandons_recovery() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        router
            .render(&url(&format!("{APP}?type=recovery&token=abc123")), None)
            .await;
        let view = router
            .render(
                &url(APP),
                Some(UserAction::Navigate {
                    to: AuthScreen::Login,
                }),
            )
            .await;

        assert_eq!(view.mode, AuthMode::Login);
        assert!(router.session().is_none());
    }

    #[tokio::test]
    async fn actions_outside_their_mode_are_ignored() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        let view = router.render(&url(APP), Some(UserAction::Logout)).await;
        assert_eq!(view.mode, AuthMode::Landing);
        assert_eq!(view.notice, None);

        let view = router
            .render(&url(APP), Some(update_password("new-password", "new-password")))
            .await;
        assert_eq!(view.mode, AuthMode::Landing);
        assert_eq!(provider.calls("update_user"), 0);
    }

    #[tokio::test]
    async fn set_theme_updates_profile() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        router
            .render(&url(&format!("{APP}?auth=login")), Some(login_action()))
            .await;
        let view = router
            .render(
                &url(APP),
                Some(UserAction::SetTheme {
                    theme: "dark".to_string(),
                }),
            )
            .await;

        assert_eq!(view.notice, Some(Notice::success("Preferences saved.")));
        assert_eq!(
            view.profile.unwrap().theme_preference.as_deref(),
            Some("dark")
        );
    }

    #[tokio::test]
    async fn expired_fragment_access_token_uses_refresh_token() {
        let provider = FakeProvider::new().failing("get_user", 401);
        let mut router = router(&provider);

        let view = router
            .render(
                &url(&format!(
                    "{APP}#access_token=expired&refresh_token=R&type=recovery"
                )),
                None,
            )
            .await;

        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert_eq!(view.location.as_deref(), Some(APP));
        assert_eq!(view.profile.unwrap().kind, SessionKind::Full);
        assert_eq!(provider.calls("get_user"), 1);
        assert_eq!(provider.calls("refresh_session"), 1);
    }

    #[tokio::test]
    async fn recovery_link_signs_out_the_live_session() {
        let provider = FakeProvider::new();
        let mut router = router(&provider);

        router
            .render(&url(&format!("{APP}?auth=login")), Some(login_action()))
            .await;
        assert_eq!(router.mode(), AuthMode::Authenticated);

        let view = router
            .render(&url(&format!("{APP}?type=recovery&token=abc123")), None)
            .await;

        assert_eq!(view.mode, AuthMode::RecoveryPasswordEntry);
        assert!(router.app_session().is_none());
        assert_eq!(provider.calls("sign_out"), 1);
    }
}
