//! Authentication session and recovery-flow controller.

pub mod bridge;
pub mod claims;
pub mod error;
pub mod exchange;
pub mod provider;
pub mod recovery;
pub mod retry;
pub mod router;
pub mod session;
pub mod types;

pub use error::AuthError;
pub use provider::{GoTrueClient, IdentityProvider};
pub use retry::RetryPolicy;
pub use router::{RouterConfig, SessionRouter};
pub use session::{IdentityCheck, Session, SessionKind};
pub use types::{AuthMode, AuthScreen, Notice, NoticeLevel, UserAction, View};
