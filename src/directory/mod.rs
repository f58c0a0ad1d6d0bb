use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::AuthError;
use crate::identifier::{self, LookupMethod};

pub mod repo;
pub mod repo_types;

pub use repo::PgUserStore;
pub use repo_types::UserRecord;

/// How many rows the last-resort email scan will pull before giving up.
const EMAIL_SCAN_LIMIT: i64 = 500;

/// Read/write access to the hosted `users` table. Lookups never mutate;
/// the single write is the password update during first-time setup.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Case-insensitive substring match on `identifier`, first hit wins.
    async fn find_by_identifier_fuzzy(&self, fragment: &str)
        -> anyhow::Result<Option<UserRecord>>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Case-insensitive exact match on `email`.
    async fn find_by_email_ci(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Bounded page of recent records for in-memory reconciliation of
    /// emails entered with inconsistent casing.
    async fn list_page(&self, limit: i64) -> anyhow::Result<Vec<UserRecord>>;

    /// Persist a new password hash and mark registration complete.
    /// Returns whether a row matched `user_id`.
    async fn store_password_hash(&self, user_id: &str, hash: &str) -> anyhow::Result<bool>;
}

/// One step of the phone-ID lookup cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Exact(String),
    Substring(String),
}

/// Builds the ordered cascade for a phone-style ID: exact as-typed, exact
/// canonical (with "+"), exact stripped (only when typed with "+"), then
/// substring over every fallback form. Evaluated short-circuit, so the
/// ordering deterministically resolves legacy rows stored either way.
pub fn phone_probes(raw: &str) -> Vec<Probe> {
    let forms = identifier::phone_forms(raw);
    let mut probes = vec![Probe::Exact(forms.original.clone())];
    if forms.with_plus != forms.original {
        probes.push(Probe::Exact(forms.with_plus));
    }
    if forms.original.starts_with('+') {
        probes.push(Probe::Exact(forms.without_plus));
    }
    for form in identifier::fallback_forms(raw) {
        probes.push(Probe::Substring(form));
    }
    probes
}

/// Resolve a login identifier to a single account, or a typed "not found".
///
/// Backend/query failures are reported as `AuthError::Backend` so callers
/// can show a generic system error instead of "no account found".
pub async fn lookup_user(
    store: &dyn UserStore,
    raw: &str,
    method: LookupMethod,
) -> Result<UserRecord, AuthError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthError::InvalidInput("identifier"));
    }

    match method {
        LookupMethod::PhoneId => lookup_by_phone_id(store, trimmed).await,
        LookupMethod::Email => lookup_by_email(store, trimmed).await,
    }
}

async fn lookup_by_phone_id(store: &dyn UserStore, raw: &str) -> Result<UserRecord, AuthError> {
    for probe in phone_probes(raw) {
        let found = match &probe {
            Probe::Exact(value) => store.find_by_identifier(value).await,
            Probe::Substring(value) => store.find_by_identifier_fuzzy(value).await,
        };
        match found {
            Ok(Some(user)) => {
                debug!(user_id = %user.id, probe = ?probe, "identifier resolved");
                return Ok(user);
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, probe = ?probe, "identifier lookup query failed");
                return Err(AuthError::Backend(e));
            }
        }
    }
    warn!(identifier = %raw, "no account matches identifier");
    Err(AuthError::UserNotFound)
}

async fn lookup_by_email(store: &dyn UserStore, raw: &str) -> Result<UserRecord, AuthError> {
    let canonical = identifier::canonical_email(raw);

    match store.find_by_email(&canonical).await {
        Ok(Some(user)) => {
            debug!(user_id = %user.id, "email resolved exactly");
            return Ok(user);
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "email lookup query failed");
            return Err(AuthError::Backend(e));
        }
    }

    match store.find_by_email_ci(&canonical).await {
        Ok(Some(user)) => {
            debug!(user_id = %user.id, "email resolved case-insensitively");
            return Ok(user);
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "email lookup query failed");
            return Err(AuthError::Backend(e));
        }
    }

    // Last resort for rows stored with stray whitespace or odd casing the
    // database-side comparison misses.
    let page = store
        .list_page(EMAIL_SCAN_LIMIT)
        .await
        .map_err(AuthError::Backend)?;
    for user in page {
        let matches = user
            .email
            .as_deref()
            .map(|e| e.trim().eq_ignore_ascii_case(&canonical))
            .unwrap_or(false);
        if matches {
            debug!(user_id = %user.id, "email resolved by page scan");
            return Ok(user);
        }
    }

    warn!(email = %canonical, "no account matches email");
    Err(AuthError::EmailNotFound)
}

/// In-memory `UserStore` used by tests and demos. Records every call so
/// tests can assert which cascade steps ran.
#[derive(Default)]
pub struct MemStore {
    inner: std::sync::Mutex<MemStoreInner>,
}

#[derive(Default)]
struct MemStoreInner {
    users: Vec<UserRecord>,
    calls: Vec<String>,
    fail_queries: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        self.inner.lock().unwrap().users.push(user);
    }

    /// Make every query fail, to exercise the system-error path.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.lock().unwrap().fail_queries = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn get(&self, user_id: &str) -> Option<UserRecord> {
        self.inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
    }

    fn record(&self, call: impl Into<String>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call.into());
        if inner.fail_queries {
            anyhow::bail!("simulated query failure");
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemStore {
    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<UserRecord>> {
        self.record(format!("find_by_identifier:{identifier}"))?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .iter()
            .find(|u| u.identifier.as_deref() == Some(identifier))
            .cloned())
    }

    async fn find_by_identifier_fuzzy(
        &self,
        fragment: &str,
    ) -> anyhow::Result<Option<UserRecord>> {
        self.record(format!("find_by_identifier_fuzzy:{fragment}"))?;
        let needle = fragment.to_lowercase();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .iter()
            .find(|u| {
                u.identifier
                    .as_deref()
                    .map(|i| i.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        self.record(format!("find_by_email:{email}"))?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_email_ci(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        self.record(format!("find_by_email_ci:{email}"))?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn list_page(&self, limit: i64) -> anyhow::Result<Vec<UserRecord>> {
        self.record("list_page")?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().take(limit as usize).cloned().collect())
    }

    async fn store_password_hash(&self, user_id: &str, hash: &str) -> anyhow::Result<bool> {
        self.record(format!("store_password_hash:{user_id}"))?;
        let mut inner = self.inner.lock().unwrap();
        for user in &mut inner.users {
            if user.id == user_id {
                user.password_hash = Some(hash.to_string());
                user.registration_complete = true;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) fn test_user(id: &str, identifier: Option<&str>, email: Option<&str>) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        identifier: identifier.map(str::to_string),
        email: email.map(str::to_string),
        password_hash: None,
        display_name: format!("user {id}"),
        registration_complete: false,
        subscription_status: None,
        expiration_date: None,
        created_at: time::OffsetDateTime::now_utc(),
    }
}
