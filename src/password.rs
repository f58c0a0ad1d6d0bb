use tracing::{error, info};

use crate::directory::UserStore;
use crate::error::AuthError;

/// bcrypt hash prefixes this system recognizes as its own.
const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// How a stored password column is interpreted.
///
/// Pre-migration rows stored the password as-is; those are kept loggable-in
/// through the explicit `LegacyPlaintext` branch so the weaker comparison is
/// a single auditable place. New accounts only ever produce `Hashed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPassword {
    Hashed(String),
    LegacyPlaintext(String),
    Unset,
}

impl StoredPassword {
    /// Interpret the nullable column value. `NULL`, the empty string, and
    /// the literal string "null" (a sentinel some legacy rows carry) all
    /// mean no password has been set yet.
    pub fn from_column(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return StoredPassword::Unset;
        };
        let value = raw.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            StoredPassword::Unset
        } else if BCRYPT_PREFIXES.iter().any(|p| value.starts_with(p)) {
            StoredPassword::Hashed(value.to_string())
        } else {
            StoredPassword::LegacyPlaintext(value.to_string())
        }
    }

    /// Whether the account is still in first-time setup.
    pub fn is_unset(&self) -> bool {
        matches!(self, StoredPassword::Unset)
    }

    /// Check a supplied password. Returns false on any mismatch or on a
    /// malformed stored hash; never errors.
    pub fn verify(&self, supplied: &str) -> bool {
        match self {
            StoredPassword::Unset => false,
            StoredPassword::Hashed(hash) => bcrypt::verify(supplied, hash).unwrap_or(false),
            StoredPassword::LegacyPlaintext(stored) => supplied == stored,
        }
    }
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let hash = bcrypt::hash(plain, bcrypt::DEFAULT_COST).map_err(|e| {
        error!(error = %e, "bcrypt hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(hash)
}

/// Hash and persist a first-time password, marking registration complete.
/// All-or-nothing: a computed hash that fails to persist surfaces as
/// `Persistence` and leaves the account unchanged.
pub async fn set_password(
    store: &dyn UserStore,
    user_id: &str,
    plain: &str,
) -> Result<(), AuthError> {
    if user_id.trim().is_empty() {
        return Err(AuthError::InvalidInput("user_id"));
    }
    if plain.is_empty() {
        return Err(AuthError::InvalidInput("password"));
    }

    let hash = hash_password(plain).map_err(AuthError::Persistence)?;
    let updated = store
        .store_password_hash(user_id, &hash)
        .await
        .map_err(AuthError::Persistence)?;
    if !updated {
        return Err(AuthError::Persistence(anyhow::anyhow!(
            "no user row matched id {user_id}"
        )));
    }

    info!(user_id = %user_id, "password set, registration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{test_user, MemStore};

    // low cost keeps the hashing tests fast
    fn quick_hash(plain: &str) -> String {
        bcrypt::hash(plain, 4).unwrap()
    }

    #[test]
    fn column_sentinels_mean_unset() {
        assert_eq!(StoredPassword::from_column(None), StoredPassword::Unset);
        assert_eq!(StoredPassword::from_column(Some("")), StoredPassword::Unset);
        assert_eq!(
            StoredPassword::from_column(Some("  ")),
            StoredPassword::Unset
        );
        assert_eq!(
            StoredPassword::from_column(Some("null")),
            StoredPassword::Unset
        );
        assert_eq!(
            StoredPassword::from_column(Some("NULL")),
            StoredPassword::Unset
        );
    }

    #[test]
    fn bcrypt_prefix_is_hashed_everything_else_is_legacy() {
        let hash = quick_hash("s3cret");
        assert!(matches!(
            StoredPassword::from_column(Some(&hash)),
            StoredPassword::Hashed(_)
        ));
        assert_eq!(
            StoredPassword::from_column(Some("hunter2")),
            StoredPassword::LegacyPlaintext("hunter2".into())
        );
    }

    #[test]
    fn verify_roundtrip_and_rejection() {
        let stored = StoredPassword::from_column(Some(&quick_hash("s3cret!")));
        assert!(stored.verify("s3cret!"));
        assert!(!stored.verify("wrong"));
    }

    #[test]
    fn verify_never_panics_on_unset_or_garbage() {
        assert!(!StoredPassword::Unset.verify("anything"));
        // bcrypt prefix followed by garbage must come back false, not error
        let stored = StoredPassword::from_column(Some("$2b$not-a-real-hash"));
        assert!(!stored.verify("anything"));
    }

    #[test]
    fn legacy_comparison_is_direct_equality() {
        let stored = StoredPassword::LegacyPlaintext("hunter2".into());
        assert!(stored.verify("hunter2"));
        assert!(!stored.verify("Hunter2"));
    }

    #[tokio::test]
    async fn set_password_persists_hash_and_completes_registration() {
        let store = MemStore::new();
        store.insert(test_user("u1", Some("5511999998888"), None));

        set_password(&store, "u1", "s3cret!").await.unwrap();

        let user = store.get("u1").unwrap();
        assert!(user.registration_complete);
        let stored = StoredPassword::from_column(user.password_hash.as_deref());
        assert!(matches!(stored, StoredPassword::Hashed(_)));
        assert!(stored.verify("s3cret!"));
        assert!(!stored.verify("other"));
    }

    #[tokio::test]
    async fn set_password_rejects_empty_input() {
        let store = MemStore::new();
        let err = set_password(&store, "", "s3cret!").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput("user_id")));
        let err = set_password(&store, "u1", "").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput("password")));
        // neither invalid call may reach the store
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn set_password_for_unknown_user_is_a_persistence_error() {
        let store = MemStore::new();
        let err = set_password(&store, "ghost", "s3cret!").await.unwrap_err();
        assert!(matches!(err, AuthError::Persistence(_)));
    }
}
