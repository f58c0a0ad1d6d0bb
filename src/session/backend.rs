use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User object owned by the hosted auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendUser {
    pub id: String,
    pub email: Option<String>,
    /// The user metadata blob; `client_id` inside it links the backend
    /// session to our own user row for row-level security.
    #[serde(rename = "user_metadata", default)]
    pub metadata: HashMap<String, Value>,
}

impl BackendUser {
    pub fn client_id(&self) -> Option<&str> {
        self.metadata.get("client_id").and_then(Value::as_str)
    }
}

/// The hosted provider's session object. Eventually consistent with the
/// local session; never the source of truth for "is the user logged in".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: BackendUser,
}

/// Metadata attached to synthetic accounts so downstream row-level-security
/// policies can map the backend session onto the client row.
pub fn client_metadata(user_id: &str, display_name: &str) -> HashMap<String, Value> {
    HashMap::from([
        ("display_name".to_string(), Value::from(display_name)),
        ("client_id".to_string(), Value::from(user_id)),
        ("role".to_string(), Value::from("client")),
    ])
}

/// The hosted provider's native auth capability, as opaque async calls.
/// Every method can fail; callers at the coordinator boundary log and
/// swallow those failures.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn current_user(&self) -> anyhow::Result<Option<BackendUser>>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> anyhow::Result<BackendSession>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: HashMap<String, Value>,
    ) -> anyhow::Result<BackendSession>;

    async fn sign_in_anonymously(&self) -> anyhow::Result<BackendSession>;

    async fn update_user_metadata(
        &self,
        metadata: HashMap<String, Value>,
    ) -> anyhow::Result<BackendUser>;

    async fn refresh_session(&self) -> anyhow::Result<BackendSession>;

    async fn sign_out(&self) -> anyhow::Result<()>;
}

/// In-memory stand-in for the hosted provider, with per-call failure
/// switches for exercising every rung of the reconciliation ladder.
#[derive(Default)]
pub struct FakeBackend {
    state: std::sync::Mutex<FakeBackendState>,
}

#[derive(Default)]
pub struct FakeBackendState {
    pub current: Option<BackendUser>,
    pub accounts: HashMap<String, FakeAccount>,
    pub calls: Vec<&'static str>,
    pub fail_current_user: bool,
    pub fail_sign_in: bool,
    pub fail_sign_up: bool,
    pub fail_anonymous: bool,
    pub fail_update: bool,
    pub fail_refresh: bool,
    pub fail_sign_out: bool,
    token_seq: u64,
}

#[derive(Debug, Clone)]
pub struct FakeAccount {
    pub password: String,
    pub user: BackendUser,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip every failure switch on: the fully unreachable backend.
    pub fn fail_everything(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_current_user = true;
        state.fail_sign_in = true;
        state.fail_sign_up = true;
        state.fail_anonymous = true;
        state.fail_update = true;
        state.fail_refresh = true;
        state.fail_sign_out = true;
    }

    pub fn configure(&self, f: impl FnOnce(&mut FakeBackendState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn current(&self) -> Option<BackendUser> {
        self.state.lock().unwrap().current.clone()
    }

    fn session_for(state: &mut FakeBackendState, user: BackendUser) -> BackendSession {
        state.token_seq += 1;
        BackendSession {
            access_token: format!("access-{}", state.token_seq),
            refresh_token: format!("refresh-{}", state.token_seq),
            expires_in: Some(3600),
            user,
        }
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn current_user(&self) -> anyhow::Result<Option<BackendUser>> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("current_user");
        if state.fail_current_user {
            anyhow::bail!("simulated network error");
        }
        Ok(state.current.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> anyhow::Result<BackendSession> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("sign_in_with_password");
        if state.fail_sign_in {
            anyhow::bail!("simulated network error");
        }
        let account = state
            .accounts
            .get(email)
            .filter(|a| a.password == password)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("invalid login credentials"))?;
        state.current = Some(account.user.clone());
        Ok(Self::session_for(state, account.user))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: HashMap<String, Value>,
    ) -> anyhow::Result<BackendSession> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("sign_up");
        if state.fail_sign_up {
            anyhow::bail!("simulated network error");
        }
        if state.accounts.contains_key(email) {
            anyhow::bail!("user already registered");
        }
        let user = BackendUser {
            id: format!("backend-{email}"),
            email: Some(email.to_string()),
            metadata,
        };
        state.accounts.insert(
            email.to_string(),
            FakeAccount {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        state.current = Some(user.clone());
        Ok(Self::session_for(state, user))
    }

    async fn sign_in_anonymously(&self) -> anyhow::Result<BackendSession> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("sign_in_anonymously");
        if state.fail_anonymous {
            anyhow::bail!("simulated network error");
        }
        state.token_seq += 1;
        let user = BackendUser {
            id: format!("anon-{}", state.token_seq),
            email: None,
            metadata: HashMap::new(),
        };
        state.current = Some(user.clone());
        Ok(Self::session_for(state, user))
    }

    async fn update_user_metadata(
        &self,
        metadata: HashMap<String, Value>,
    ) -> anyhow::Result<BackendUser> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("update_user_metadata");
        if state.fail_update {
            anyhow::bail!("simulated network error");
        }
        let user = state
            .current
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no active backend session"))?;
        user.metadata.extend(metadata);
        Ok(user.clone())
    }

    async fn refresh_session(&self) -> anyhow::Result<BackendSession> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("refresh_session");
        if state.fail_refresh {
            anyhow::bail!("simulated network error");
        }
        let user = state
            .current
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no active backend session"))?;
        Ok(Self::session_for(state, user))
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        let state = &mut *self.state.lock().unwrap();
        state.calls.push("sign_out");
        if state.fail_sign_out {
            anyhow::bail!("simulated network error");
        }
        state.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_metadata_carries_the_rls_fields() {
        let md = client_metadata("u1", "Maria");
        assert_eq!(md.get("client_id").unwrap(), "u1");
        assert_eq!(md.get("display_name").unwrap(), "Maria");
        assert_eq!(md.get("role").unwrap(), "client");
    }

    #[test]
    fn backend_user_exposes_client_id_from_metadata() {
        let user = BackendUser {
            id: "b1".into(),
            email: None,
            metadata: client_metadata("u1", "Maria"),
        };
        assert_eq!(user.client_id(), Some("u1"));
    }

    #[tokio::test]
    async fn fake_sign_up_then_sign_in() {
        let backend = FakeBackend::new();
        backend
            .sign_up("a@b.c", "pw", client_metadata("u1", "Maria"))
            .await
            .unwrap();
        backend.sign_out().await.unwrap();
        let session = backend.sign_in_with_password("a@b.c", "pw").await.unwrap();
        assert_eq!(session.user.client_id(), Some("u1"));
        assert!(backend
            .sign_in_with_password("a@b.c", "wrong")
            .await
            .is_err());
    }
}
