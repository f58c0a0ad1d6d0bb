use std::sync::Arc;

use tracing::{error, info, warn};

use crate::directory::{lookup_user, UserRecord, UserStore};
use crate::error::AuthError;
use crate::identifier::{self, LookupMethod};
use crate::password::{set_password, StoredPassword};
use crate::session::SessionCoordinator;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Privileged identifier configured out-of-band. Its password is verified
/// against a configured bcrypt hash; no credential lives in source, and
/// leaving either setting unset disables the mechanism.
#[derive(Debug, Clone)]
pub struct MasterAccount {
    pub identifier: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    CheckIdentifier,
    CreatePassword,
    EnterPassword,
    /// Terminal: ownership passes to application routing.
    Authenticated,
}

/// The three-step login flow: verify identifier, then create a password
/// (first-time setup) or enter one, then authenticated.
///
/// Failures keep the current step active with a user-visible message, so
/// the user retries without re-entering earlier fields. The `busy` flag is
/// for the UI binding to disable resubmission while a call is pending.
pub struct AuthFlow {
    users: Arc<dyn UserStore>,
    coordinator: SessionCoordinator,
    master: Option<MasterAccount>,
    step: FlowStep,
    candidate: Option<UserRecord>,
    privileged: bool,
    error: Option<String>,
    busy: bool,
}

impl AuthFlow {
    pub fn new(
        users: Arc<dyn UserStore>,
        coordinator: SessionCoordinator,
        master: Option<MasterAccount>,
    ) -> Self {
        Self {
            users,
            coordinator,
            master,
            step: FlowStep::CheckIdentifier,
            candidate: None,
            privileged: false,
            error: None,
            busy: false,
        }
    }

    pub fn step(&self) -> FlowStep {
        self.step
    }

    pub fn candidate(&self) -> Option<&UserRecord> {
        self.candidate.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    fn is_master(&self, identifier: &str) -> bool {
        let Some(master) = &self.master else {
            return false;
        };
        master.identifier == identifier
            || identifier::fallback_forms(identifier).contains(&master.identifier)
    }

    /// Step one: resolve the identifier and branch on password presence.
    pub async fn submit_identifier(&mut self, raw: &str, method: LookupMethod) {
        if self.busy || self.step != FlowStep::CheckIdentifier {
            return;
        }
        self.error = None;

        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            self.error = Some(AuthError::InvalidInput("identifier").to_string());
            return;
        }
        if method == LookupMethod::Email && !identifier::is_valid_email(&trimmed.to_lowercase()) {
            self.error = Some("enter a valid email address".to_string());
            return;
        }

        // defensive reset against stale multi-tab state, scoped to the
        // auth-owned storage keys
        self.coordinator.store().clear();

        self.busy = true;
        let result = lookup_user(self.users.as_ref(), &trimmed, method).await;
        self.busy = false;

        let privileged = self.is_master(&trimmed);
        match result {
            Ok(user) => {
                let password = StoredPassword::from_column(user.password_hash.as_deref());
                self.step = if !privileged && password.is_unset() {
                    FlowStep::CreatePassword
                } else {
                    FlowStep::EnterPassword
                };
                self.candidate = Some(user);
                self.privileged = privileged;
            }
            Err(AuthError::UserNotFound | AuthError::EmailNotFound) if privileged => {
                // the privileged identifier need not exist as a client row
                self.candidate = None;
                self.privileged = true;
                self.step = FlowStep::EnterPassword;
            }
            Err(err) => {
                if !err.is_user_facing() {
                    error!(error = ?err, "identifier check failed");
                }
                self.error = Some(err.to_string());
            }
        }
    }

    /// Step two, first-time setup: validate locally, persist the hash,
    /// establish the session.
    pub async fn create_password(&mut self, password: &str, confirm: &str) {
        if self.busy || self.step != FlowStep::CreatePassword {
            return;
        }
        self.error = None;

        // local validation happens before any backend call
        if password.chars().count() < MIN_PASSWORD_LEN {
            self.error = Some(format!(
                "password must have at least {MIN_PASSWORD_LEN} characters"
            ));
            return;
        }
        if password != confirm {
            self.error = Some("passwords do not match".to_string());
            return;
        }
        let Some(user) = self.candidate.clone() else {
            self.step = FlowStep::CheckIdentifier;
            return;
        };

        self.busy = true;
        let result = set_password(self.users.as_ref(), &user.id, password).await;
        match result {
            Ok(()) => {
                self.finish_login(&user.id, &user.display_name, password)
                    .await;
            }
            Err(err) => {
                error!(error = ?err, user_id = %user.id, "password creation failed");
                self.error = Some(err.to_string());
            }
        }
        self.busy = false;
    }

    /// Step two, returning user: verify the password and establish the
    /// session.
    pub async fn enter_password(&mut self, password: &str) {
        if self.busy || self.step != FlowStep::EnterPassword {
            return;
        }
        self.error = None;

        if password.is_empty() {
            self.error = Some(AuthError::InvalidInput("password").to_string());
            return;
        }

        let ok = if self.privileged {
            self.master
                .as_ref()
                .map(|m| bcrypt::verify(password, &m.password_hash).unwrap_or(false))
                .unwrap_or(false)
        } else {
            self.candidate
                .as_ref()
                .map(|u| StoredPassword::from_column(u.password_hash.as_deref()).verify(password))
                .unwrap_or(false)
        };
        if !ok {
            warn!(privileged = self.privileged, "password mismatch");
            self.error = Some(AuthError::IncorrectPassword.to_string());
            return;
        }

        let (user_id, user_name) = match (&self.candidate, &self.master) {
            (Some(user), _) => (user.id.clone(), user.display_name.clone()),
            (None, Some(master)) => (master.identifier.clone(), "Administrator".to_string()),
            (None, None) => return, // unreachable: EnterPassword implies one of the two
        };

        self.busy = true;
        self.finish_login(&user_id, &user_name, password).await;
        self.busy = false;
    }

    async fn finish_login(&mut self, user_id: &str, user_name: &str, credential: &str) {
        match self
            .coordinator
            .establish_session(user_id, user_name, Some(credential))
            .await
        {
            Ok(_) => {
                info!(user_id = %user_id, "authenticated");
                self.step = FlowStep::Authenticated;
            }
            Err(err) => {
                error!(error = ?err, "session establishment failed");
                self.error = Some(err.to_string());
            }
        }
    }

    /// Return to the identifier step, discarding the candidate.
    pub fn go_back(&mut self) {
        if matches!(self.step, FlowStep::CreatePassword | FlowStep::EnterPassword) {
            self.step = FlowStep::CheckIdentifier;
            self.candidate = None;
            self.privileged = false;
            self.error = None;
        }
    }
}
