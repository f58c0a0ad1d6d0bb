use thiserror::Error;

/// Failure taxonomy for the authentication flow.
///
/// The first four variants are expected, user-recoverable outcomes whose
/// display text can be shown directly. `Persistence` and `Backend` are
/// system faults: the display text stays generic and the source is logged.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing required field: {0}")]
    InvalidInput(&'static str),
    #[error("no account found for this ID")]
    UserNotFound,
    #[error("no account found for this email")]
    EmailNotFound,
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("could not save your changes, please try again")]
    Persistence(#[source] anyhow::Error),
    #[error("service unavailable, please try again")]
    Backend(#[source] anyhow::Error),
}

impl AuthError {
    /// Whether the error is an expected outcome the user can recover from
    /// by correcting their input, as opposed to a system fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidInput(_)
                | AuthError::UserNotFound
                | AuthError::EmailNotFound
                | AuthError::IncorrectPassword
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_faults_are_not_user_facing() {
        assert!(AuthError::UserNotFound.is_user_facing());
        assert!(AuthError::IncorrectPassword.is_user_facing());
        assert!(!AuthError::Backend(anyhow::anyhow!("boom")).is_user_facing());
        assert!(!AuthError::Persistence(anyhow::anyhow!("boom")).is_user_facing());
    }

    #[test]
    fn generic_text_does_not_leak_source() {
        let err = AuthError::Backend(anyhow::anyhow!("connection refused to 10.0.0.1"));
        assert!(!err.to_string().contains("10.0.0.1"));
    }
}
