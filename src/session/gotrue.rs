use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::backend::{AuthBackend, BackendSession, BackendUser};

#[derive(Debug, Clone)]
struct TokenPair {
    access: String,
    refresh: String,
}

/// `AuthBackend` over a GoTrue-style HTTP API (the Supabase auth surface).
/// Holds the token pair of the current backend session in memory; the
/// tokens are a reconciliation detail, never persisted locally.
pub struct GoTrueClient {
    http: Client,
    base_url: String,
    anon_key: String,
    tokens: Mutex<Option<TokenPair>>,
}

impl GoTrueClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            tokens: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn access_token(&self) -> Option<String> {
        self.tokens.lock().unwrap().as_ref().map(|t| t.access.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.lock().unwrap().as_ref().map(|t| t.refresh.clone())
    }

    fn remember(&self, session: &BackendSession) {
        *self.tokens.lock().unwrap() = Some(TokenPair {
            access: session.access_token.clone(),
            refresh: session.refresh_token.clone(),
        });
    }

    async fn into_checked(
        response: reqwest::Response,
        context: &'static str,
    ) -> anyhow::Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, context, "gotrue request rejected");
            anyhow::bail!("{context}: HTTP {status}: {body}");
        }
        Ok(response)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: Value,
        context: &'static str,
    ) -> anyhow::Result<BackendSession> {
        let url = self.url(&format!("/auth/v1/token?grant_type={grant_type}"));
        debug!(url = %url, context, "gotrue token grant");
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let session: BackendSession = Self::into_checked(response, context).await?.json().await?;
        self.remember(&session);
        Ok(session)
    }

    async fn signup(&self, body: Value, context: &'static str) -> anyhow::Result<BackendSession> {
        let url = self.url("/auth/v1/signup");
        debug!(url = %url, context, "gotrue signup");
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let session: BackendSession = Self::into_checked(response, context).await?.json().await?;
        self.remember(&session);
        Ok(session)
    }
}

#[async_trait]
impl AuthBackend for GoTrueClient {
    async fn current_user(&self) -> anyhow::Result<Option<BackendUser>> {
        let Some(access) = self.access_token() else {
            return Ok(None);
        };
        let response = self
            .http
            .get(self.url("/auth/v1/user"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {access}"))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // the backend revoked the session server-side
            debug!("gotrue session no longer valid");
            *self.tokens.lock().unwrap() = None;
            return Ok(None);
        }
        let user: BackendUser = Self::into_checked(response, "current_user").await?.json().await?;
        Ok(Some(user))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> anyhow::Result<BackendSession> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
            "sign_in_with_password",
        )
        .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: HashMap<String, Value>,
    ) -> anyhow::Result<BackendSession> {
        self.signup(
            serde_json::json!({ "email": email, "password": password, "data": metadata }),
            "sign_up",
        )
        .await
    }

    async fn sign_in_anonymously(&self) -> anyhow::Result<BackendSession> {
        self.signup(serde_json::json!({ "data": {} }), "sign_in_anonymously")
            .await
    }

    async fn update_user_metadata(
        &self,
        metadata: HashMap<String, Value>,
    ) -> anyhow::Result<BackendUser> {
        let access = self
            .access_token()
            .ok_or_else(|| anyhow::anyhow!("no active backend session"))?;
        let response = self
            .http
            .put(self.url("/auth/v1/user"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {access}"))
            .json(&serde_json::json!({ "data": metadata }))
            .send()
            .await?;
        let user = Self::into_checked(response, "update_user_metadata")
            .await?
            .json()
            .await?;
        Ok(user)
    }

    async fn refresh_session(&self) -> anyhow::Result<BackendSession> {
        let refresh = self
            .refresh_token()
            .ok_or_else(|| anyhow::anyhow!("no refresh token"))?;
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh }),
            "refresh_session",
        )
        .await
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        let Some(access) = self.access_token() else {
            return Ok(());
        };
        let response = self
            .http
            .post(self.url("/auth/v1/logout"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {access}"))
            .send()
            .await?;
        // drop the tokens whatever the server said
        *self.tokens.lock().unwrap() = None;
        Self::into_checked(response, "sign_out").await?;
        Ok(())
    }
}
