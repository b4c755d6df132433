//! Account sign-up and sign-in.
//!
//! Input is validated before the backend is contacted, and backend failures
//! are collapsed into a handful of generic messages so responses never
//! reveal whether an account exists.

use homecam_core::gateway::{PersistenceGateway, Session};
use homecam_core::redact::scrub_email;
use homecam_core::validation::{normalize_email, validate_email, validate_password};
use homecam_core::{GatewayError, GatewayResult};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

const INVALID_EMAIL: &str = "Please enter a valid email address";
const PASSWORD_REQUIRED: &str = "Password is required";
const ALREADY_REGISTERED: &str = "An account with this email may already exist";
const CHECK_CREDENTIALS: &str = "Please check your email and password";
const REGISTRATION_FAILED: &str = "An error occurred during registration";
const INVALID_LOGIN: &str = "Invalid email or password";
const NETWORK_FAILURE: &str = "Network error. Please try again.";

/// Category of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthErrorKind {
    /// Rejected before reaching the backend.
    Validation,
    /// Rejected by the backend.
    Auth,
    /// Backend unreachable.
    Network,
}

/// User-facing authentication failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct AuthError {
    /// Safe to show to the user.
    pub message: String,
    /// Category.
    pub kind: AuthErrorKind,
}

impl AuthError {
    fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Validation, message)
    }

    fn network() -> Self {
        Self::new(AuthErrorKind::Network, NETWORK_FAILURE)
    }
}

/// Authentication front end over a [`PersistenceGateway`].
#[derive(Clone)]
pub struct AuthService {
    gateway: Arc<dyn PersistenceGateway>,
}

impl AuthService {
    /// Service backed by `gateway`.
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    fn checked_email(email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        if validate_email(&email) {
            Ok(email)
        } else {
            Err(AuthError::validation(INVALID_EMAIL))
        }
    }

    /// Register a new account.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = Self::checked_email(email)?;

        let policy = validate_password(password);
        if !policy.is_valid() {
            return Err(AuthError::validation(policy.message()));
        }

        match self.gateway.sign_up(&email, password).await {
            Ok(()) => {
                tracing::info!(email = %scrub_email(&email), "account registered");
                Ok(())
            }
            Err(GatewayError::Network(reason)) => {
                tracing::error!(%reason, "sign up failed: backend unreachable");
                Err(AuthError::network())
            }
            Err(err) => {
                let detail = err.to_string();
                tracing::warn!(error = %scrub_email(&detail), "sign up rejected");
                let lowered = detail.to_lowercase();
                let message = if lowered.contains("already registered") {
                    ALREADY_REGISTERED
                } else if lowered.contains("invalid") {
                    CHECK_CREDENTIALS
                } else {
                    REGISTRATION_FAILED
                };
                Err(AuthError::new(AuthErrorKind::Auth, message))
            }
        }
    }

    /// Sign in and make the session current.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = Self::checked_email(email)?;
        if password.is_empty() {
            return Err(AuthError::validation(PASSWORD_REQUIRED));
        }

        match self.gateway.sign_in(&email, password).await {
            Ok(session) => {
                tracing::info!(user = %session.user.id, "signed in");
                Ok(session)
            }
            Err(GatewayError::Network(reason)) => {
                tracing::error!(%reason, "sign in failed: backend unreachable");
                Err(AuthError::network())
            }
            Err(err) => {
                tracing::warn!(email = %scrub_email(&email), error = %err, "sign in rejected");
                Err(AuthError::new(AuthErrorKind::Auth, INVALID_LOGIN))
            }
        }
    }

    /// End the current session.
    pub async fn sign_out(&self) -> GatewayResult<()> {
        self.gateway.sign_out().await?;
        tracing::info!("signed out");
        Ok(())
    }

    /// The current session, if any.
    pub async fn current_session(&self) -> GatewayResult<Option<Session>> {
        self.gateway.current_session().await
    }

    /// Receive every session change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.gateway.subscribe_session()
    }
}
