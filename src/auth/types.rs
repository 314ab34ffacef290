//! Render-surface types: screens, user actions and the rendered view.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::session::Profile;

/// Screens reachable without a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthScreen {
    Landing,
    Login,
    Signup,
    ForgotPassword,
}

impl AuthScreen {
    /// Parse the `auth` query parameter. Recovery and authenticated modes are
    /// never selectable this way.
    #[must_use]
    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "landing" => Some(Self::Landing),
            "login" => Some(Self::Login),
            "signup" => Some(Self::Signup),
            "forgot" | "forgot_password" => Some(Self::ForgotPassword),
            _ => None,
        }
    }

    /// Value written back to the `auth` query parameter; landing has none.
    #[must_use]
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Self::Landing => None,
            Self::Login => Some("login"),
            Self::Signup => Some("signup"),
            Self::ForgotPassword => Some("forgot"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Landing,
    Login,
    Signup,
    ForgotPassword,
    RecoveryPasswordEntry,
    Authenticated,
}

impl From<AuthScreen> for AuthMode {
    fn from(screen: AuthScreen) -> Self {
        match screen {
            AuthScreen::Landing => Self::Landing,
            AuthScreen::Login => Self::Login,
            AuthScreen::Signup => Self::Signup,
            AuthScreen::ForgotPassword => Self::ForgotPassword,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Message shown in place on the current screen.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

/// Explicit user interaction submitted with a render pass.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserAction {
    Navigate {
        to: AuthScreen,
    },
    Login {
        email: String,
        #[schema(value_type = String, format = Password)]
        password: SecretString,
    },
    Signup {
        name: String,
        email: String,
        #[schema(value_type = String, format = Password)]
        password: SecretString,
        #[schema(value_type = String, format = Password)]
        confirm: SecretString,
    },
    RequestPasswordReset {
        email: String,
    },
    UpdatePassword {
        #[schema(value_type = String, format = Password)]
        password: SecretString,
        #[schema(value_type = String, format = Password)]
        confirm: SecretString,
    },
    Logout,
    SetTheme {
        theme: String,
    },
}

impl UserAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Login { .. } => "login",
            Self::Signup { .. } => "signup",
            Self::RequestPasswordReset { .. } => "request_password_reset",
            Self::UpdatePassword { .. } => "update_password",
            Self::Logout => "logout",
            Self::SetTheme { .. } => "set_theme",
        }
    }
}

/// Result of one render pass.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct View {
    pub mode: AuthMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    /// URL the client must apply with a history replace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}
